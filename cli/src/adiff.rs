//! Writes the augmented-diff XML document described in spec.md §6, from
//! the structured, XML-agnostic [`onramp_store::diff::DiffDocument`]
//! `onramp-store` produces.
//!
//! Grounded in the original's `to_aug_diff_xml`/`node_to_xml`/
//! `way_to_xml`/`relation_to_xml`: ascending id within each kind, nodes
//! then ways then relations, optional attributes omitted when absent,
//! `visible="false"` with no geometry for a deletion's `<new>`.

use anyhow::{Context, Result};
use onramp_store::diff::{
    Action, DiffDocument, DiffMember, DiffNode, DiffRelation, DiffWay, MemberGeometry, NodeEntry,
    NodeRef, OldNode, RelationEntry, WayEntry,
};
use onramp_store::model::{MemberKind, Meta, Tags};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::writer::Writer;
use std::io::Cursor;
use std::path::Path;

pub fn write_diff(path: &Path, timestamp: &str, doc: &DiffDocument) -> Result<()> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut osm = BytesStart::new("osm");
    osm.push_attribute(("version", "0.6"));
    osm.push_attribute(("generator", format!("onramp v{}", env!("CARGO_PKG_VERSION")).as_str()));
    writer.write_event(Event::Start(osm))?;

    let mut meta = BytesStart::new("meta");
    meta.push_attribute(("osm_base", timestamp));
    writer.write_event(Event::Empty(meta))?;

    for entry in &doc.nodes {
        write_node_entry(&mut writer, entry)?;
    }
    for entry in &doc.ways {
        write_way_entry(&mut writer, entry)?;
    }
    for entry in &doc.relations {
        write_relation_entry(&mut writer, entry)?;
    }

    writer.write_event(Event::End(BytesEnd::new("osm")))?;

    let bytes = writer.into_inner().into_inner();
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = Path::new(&tmp_path);
    std::fs::write(tmp_path, &bytes)
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;

    Ok(())
}

fn write_action<W: std::io::Write>(
    writer: &mut Writer<W>,
    action: Action,
    write_body: impl FnOnce(&mut Writer<W>) -> Result<()>,
) -> Result<()> {
    let mut action_tag = BytesStart::new("action");
    action_tag.push_attribute(("type", action.as_str()));
    writer.write_event(Event::Start(action_tag))?;
    write_body(writer)?;
    writer.write_event(Event::End(BytesEnd::new("action")))?;
    Ok(())
}

fn write_node_entry<W: std::io::Write>(writer: &mut Writer<W>, entry: &NodeEntry) -> Result<()> {
    write_action(writer, entry.action, |writer| {
        if let Some(old) = &entry.old {
            writer.write_event(Event::Start(BytesStart::new("old")))?;
            write_old_node(writer, old)?;
            writer.write_event(Event::End(BytesEnd::new("old")))?;
        }
        writer.write_event(Event::Start(BytesStart::new("new")))?;
        write_new_node(writer, &entry.new)?;
        writer.write_event(Event::End(BytesEnd::new("new")))?;
        Ok(())
    })
}

fn write_old_node<W: std::io::Write>(writer: &mut Writer<W>, old: &OldNode) -> Result<()> {
    let mut tag = BytesStart::new("node");
    tag.push_attribute(("id", old.id.to_string().as_str()));
    push_lat_lon(&mut tag, old.lat_e7, old.lon_e7);
    writer.write_event(Event::Empty(tag))?;
    Ok(())
}

fn write_new_node<W: std::io::Write>(writer: &mut Writer<W>, node: &DiffNode) -> Result<()> {
    let mut tag = BytesStart::new("node");
    tag.push_attribute(("id", node.id.to_string().as_str()));
    tag.push_attribute(("visible", if node.visible { "true" } else { "false" }));
    if node.visible {
        push_common_meta(&mut tag, &node.meta);
        push_lat_lon(&mut tag, node.lat_e7, node.lon_e7);
    }

    if node.visible && !node.tags.is_empty() {
        writer.write_event(Event::Start(tag))?;
        write_tags(writer, &node.tags)?;
        writer.write_event(Event::End(BytesEnd::new("node")))?;
    } else {
        writer.write_event(Event::Empty(tag))?;
    }
    Ok(())
}

fn write_way_entry<W: std::io::Write>(writer: &mut Writer<W>, entry: &WayEntry) -> Result<()> {
    write_action(writer, entry.action, |writer| {
        if let Some(old) = &entry.old {
            writer.write_event(Event::Start(BytesStart::new("old")))?;
            write_way(writer, old)?;
            writer.write_event(Event::End(BytesEnd::new("old")))?;
        }
        writer.write_event(Event::Start(BytesStart::new("new")))?;
        write_way(writer, &entry.new)?;
        writer.write_event(Event::End(BytesEnd::new("new")))?;
        Ok(())
    })
}

fn write_way<W: std::io::Write>(writer: &mut Writer<W>, way: &DiffWay) -> Result<()> {
    let mut tag = BytesStart::new("way");
    tag.push_attribute(("id", way.id.to_string().as_str()));
    tag.push_attribute(("visible", if way.visible { "true" } else { "false" }));
    if way.visible {
        push_common_meta(&mut tag, &way.meta);
    }
    writer.write_event(Event::Start(tag))?;

    if let Some(envelope) = &way.envelope {
        let mut bounds = BytesStart::new("bounds");
        bounds.push_attribute(("minlat", format_degrees(envelope.min_lat_e7).as_str()));
        bounds.push_attribute(("minlon", format_degrees(envelope.min_lon_e7).as_str()));
        bounds.push_attribute(("maxlat", format_degrees(envelope.max_lat_e7).as_str()));
        bounds.push_attribute(("maxlon", format_degrees(envelope.max_lon_e7).as_str()));
        writer.write_event(Event::Empty(bounds))?;
    }

    for node in &way.nodes {
        write_nd_ref(writer, node)?;
    }
    if way.visible {
        write_tags(writer, &way.tags)?;
    }

    writer.write_event(Event::End(BytesEnd::new("way")))?;
    Ok(())
}

fn write_nd_ref<W: std::io::Write>(writer: &mut Writer<W>, node: &NodeRef) -> Result<()> {
    let mut tag = BytesStart::new("nd");
    tag.push_attribute(("ref", node.id().to_string().as_str()));
    if let NodeRef::WithLocation(geom) = node {
        push_lat_lon(&mut tag, geom.lat_e7, geom.lon_e7);
    }
    writer.write_event(Event::Empty(tag))?;
    Ok(())
}

fn write_relation_entry<W: std::io::Write>(
    writer: &mut Writer<W>,
    entry: &RelationEntry,
) -> Result<()> {
    write_action(writer, entry.action, |writer| {
        if let Some(old) = &entry.old {
            writer.write_event(Event::Start(BytesStart::new("old")))?;
            write_relation(writer, old)?;
            writer.write_event(Event::End(BytesEnd::new("old")))?;
        }
        writer.write_event(Event::Start(BytesStart::new("new")))?;
        write_relation(writer, &entry.new)?;
        writer.write_event(Event::End(BytesEnd::new("new")))?;
        Ok(())
    })
}

fn write_relation<W: std::io::Write>(writer: &mut Writer<W>, relation: &DiffRelation) -> Result<()> {
    let mut tag = BytesStart::new("relation");
    tag.push_attribute(("id", relation.id.to_string().as_str()));
    tag.push_attribute(("visible", if relation.visible { "true" } else { "false" }));
    if relation.visible {
        push_common_meta(&mut tag, &relation.meta);
    }
    writer.write_event(Event::Start(tag))?;

    for member in &relation.members {
        write_member(writer, member)?;
    }
    if relation.visible {
        write_tags(writer, &relation.tags)?;
    }

    writer.write_event(Event::End(BytesEnd::new("relation")))?;
    Ok(())
}

fn write_member<W: std::io::Write>(writer: &mut Writer<W>, member: &DiffMember) -> Result<()> {
    let type_str = match member.kind {
        MemberKind::Node => "node",
        MemberKind::Way => "way",
        MemberKind::Relation => "relation",
    };

    match &member.geometry {
        MemberGeometry::Node(geom) => {
            let mut tag = BytesStart::new("member");
            tag.push_attribute(("type", type_str));
            tag.push_attribute(("ref", member.id.to_string().as_str()));
            tag.push_attribute(("role", member.role.as_str()));
            push_lat_lon(&mut tag, geom.lat_e7, geom.lon_e7);
            writer.write_event(Event::Empty(tag))?;
        }
        MemberGeometry::Way(nodes) => {
            let mut tag = BytesStart::new("member");
            tag.push_attribute(("type", type_str));
            tag.push_attribute(("ref", member.id.to_string().as_str()));
            tag.push_attribute(("role", member.role.as_str()));
            writer.write_event(Event::Start(tag))?;
            for node in nodes {
                write_nd_ref(writer, node)?;
            }
            writer.write_event(Event::End(BytesEnd::new("member")))?;
        }
        MemberGeometry::Relation | MemberGeometry::None => {
            // Relation members, and node members whose location could not
            // be resolved, are emitted bare.
            let mut tag = BytesStart::new("member");
            tag.push_attribute(("type", type_str));
            tag.push_attribute(("ref", member.id.to_string().as_str()));
            tag.push_attribute(("role", member.role.as_str()));
            writer.write_event(Event::Empty(tag))?;
        }
    }
    Ok(())
}

fn write_tags<W: std::io::Write>(writer: &mut Writer<W>, tags: &Tags) -> Result<()> {
    for (key, value) in tags {
        let mut tag = BytesStart::new("tag");
        tag.push_attribute(("k", key.as_str()));
        tag.push_attribute(("v", value.as_str()));
        writer.write_event(Event::Empty(tag))?;
    }
    Ok(())
}

/// Pushes version/changeset/uid/user, omitting each when it carries the
/// zero/empty sentinel value the codec uses for "not recorded" — spec.md
/// §4.H calls for optional attributes to be omitted, not emitted empty.
fn push_common_meta(tag: &mut BytesStart, meta: &Meta) {
    tag.push_attribute(("version", meta.version.to_string().as_str()));
    if meta.changeset != 0 {
        tag.push_attribute(("changeset", meta.changeset.to_string().as_str()));
    }
    if meta.uid != 0 {
        tag.push_attribute(("uid", meta.uid.to_string().as_str()));
    }
    if !meta.user.is_empty() {
        tag.push_attribute(("user", meta.user.as_str()));
    }
}

fn push_lat_lon(tag: &mut BytesStart, lat_e7: i32, lon_e7: i32) {
    tag.push_attribute(("lat", format_degrees(lat_e7).as_str()));
    tag.push_attribute(("lon", format_degrees(lon_e7).as_str()));
}

fn format_degrees(value_e7: i32) -> String {
    format!("{:.7}", value_e7 as f64 / 10_000_000.0)
}
