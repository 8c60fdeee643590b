//! A fixed-resolution spatial cell index.
//!
//! The original system derives a cell id via `S2CellId(...).parent(level)`.
//! S2 itself is not a realistic dependency here, so this reimplements the
//! same *contract* — pure, total over valid coordinates, fixed resolution,
//! identical across readers and writers — as a simple equirectangular grid
//! rather than a spherical quadtree. Any function satisfying that contract
//! is interchangeable from the Store's point of view, since nothing outside
//! this module inspects cell ids beyond equality and range-scan locality.

/// Quantization level: each cell spans roughly `360 / 2^CELL_INDEX_LEVEL`
/// degrees of longitude. Chosen to keep `cell_node` fan-out comparable to a
/// mid-level S2 cell (a few kilometers across) without tuning against real
/// data.
pub const CELL_INDEX_LEVEL: u32 = 16;

const SCALE: i64 = 1 << CELL_INDEX_LEVEL;

/// Maps a fixed-point (lat_e7, lon_e7) coordinate to a cell id. Total over
/// the full valid OSM coordinate range (±180e7, ±90e7): the grid simply
/// continues past the poles without wrapping, which is harmless since real
/// data never reaches there.
pub fn cell_id(lat_e7: i32, lon_e7: i32) -> u64 {
    let lat_cell = ((lat_e7 as i64 + 90 * 10_000_000) * SCALE / (180 * 10_000_000)) as u32;
    let lon_cell = ((lon_e7 as i64 + 180 * 10_000_000) * SCALE / (360 * 10_000_000)) as u32;
    ((lat_cell as u64) << 32) | lon_cell as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        assert_eq!(cell_id(10_000_000, 20_000_000), cell_id(10_000_000, 20_000_000));
    }

    #[test]
    fn distinguishes_distant_points() {
        assert_ne!(cell_id(10_000_000, 20_000_000), cell_id(-10_000_000, -20_000_000));
    }

    #[test]
    fn nearby_points_share_a_cell_at_high_enough_precision() {
        // Two points a few meters apart (~0.0001 degree) fall in the same cell.
        assert_eq!(cell_id(10_000_000, 20_000_000), cell_id(10_000_100, 20_000_100));
    }

    #[test]
    fn covers_full_coordinate_range() {
        for &(lat, lon) in &[
            (90_000_000, 180_000_000),
            (-90_000_000, -180_000_000),
            (0, 0),
        ] {
            let _ = cell_id(lat, lon);
        }
    }
}
