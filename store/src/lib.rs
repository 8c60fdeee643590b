//! `onramp-store` mirrors the planetary OSM dataset inside an embedded
//! key-value store and reconstructs before/after entity state for
//! augmented-diff generation.
//!
//! The crate is organized leaves-first, mirroring spec.md's component
//! table: [`engine`] is the raw byte-oriented storage backend; [`txn`]
//! layers typed, transactional multi-table access on top of it; [`model`],
//! [`schema`] and [`codec`] define and (de)serialize the three OSM entity
//! kinds; [`spatial`] and [`buffer`] are small supporting pieces;
//! [`write_handler`] applies a change stream to the store; [`diff`]
//! reconstructs and emits augmented diffs from the same stream without
//! mutating anything.
//!
//! ## Getting started
//!
//! ```rust
//! use onramp_store::engine::memory::Memory;
//! use onramp_store::event::ChangeEvent;
//! use onramp_store::model::{Meta, Node};
//! use onramp_store::txn::Env;
//! use onramp_store::write_handler::WriteHandler;
//!
//! let env = Env::new(Memory::new());
//! let mut txn = env.begin_rw().unwrap();
//! let node = Node {
//!     id: 1,
//!     visible: true,
//!     meta: Meta::default(),
//!     tags: vec![("amenity".into(), "cafe".into())],
//!     lat_e7: 10_000_000,
//!     lon_e7: 20_000_000,
//! };
//! WriteHandler::new(&mut txn).apply(&ChangeEvent::Node(node)).unwrap();
//! txn.commit().unwrap();
//! ```

pub mod buffer;
pub mod codec;
pub mod diff;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod schema;
pub mod spatial;
pub mod txn;
pub mod write_handler;
