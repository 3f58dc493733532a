//! Tile addressing on a per-zoom Hilbert curve
//!
//! Tile ids are assigned zoom level by zoom level: all ids of zoom `z - 1`
//! precede every id of zoom `z`, and inside a level ids follow the Hilbert
//! traversal of the `2^z × 2^z` grid so neighbouring tiles get close ids.

use crate::error::{FormatError, FormatResult};

/// Highest zoom level with addressable tile ids
pub const MAX_ZOOM: u8 = 31;

/// Number of tiles in all zoom levels below `z`, i.e. `(4^z - 1) / 3`.
///
/// Defined for `z <= 32`.
pub fn tiles_before_zoom(z: u8) -> u64 {
    (((1u128 << (2 * u32::from(z))) - 1) / 3) as u64
}

/// Highest tile id (exclusive) for zoom levels up to [`MAX_ZOOM`]
pub fn tile_id_limit() -> u64 {
    tiles_before_zoom(MAX_ZOOM + 1)
}

fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

/// Map (z, x, y) to its tile id.
pub fn zxy_to_tile_id(z: u8, x: u32, y: u32) -> FormatResult<u64> {
    if z > MAX_ZOOM {
        return Err(FormatError::InvalidTileCoordinate { z, x, y });
    }
    let n = 1u64 << z;
    if u64::from(x) >= n || u64::from(y) >= n {
        return Err(FormatError::InvalidTileCoordinate { z, x, y });
    }

    let (mut hx, mut hy) = (u64::from(x), u64::from(y));
    let mut d = 0u64;
    let mut s = n >> 1;
    while s > 0 {
        let rx = u64::from((hx & s) > 0);
        let ry = u64::from((hy & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        rotate(n, &mut hx, &mut hy, rx, ry);
        s >>= 1;
    }

    Ok(tiles_before_zoom(z) + d)
}

/// Map a tile id back to (z, x, y).
pub fn tile_id_to_zxy(tile_id: u64) -> FormatResult<(u8, u32, u32)> {
    let z = (0..=MAX_ZOOM)
        .find(|&z| tile_id < tiles_before_zoom(z + 1))
        .ok_or(FormatError::InvalidTileId(tile_id))?;

    let n = 1u64 << z;
    let mut t = tile_id - tiles_before_zoom(z);
    let (mut x, mut y) = (0u64, 0u64);
    let mut s = 1u64;
    while s < n {
        let rx = 1 & (t >> 1);
        let ry = 1 & (t ^ rx);
        rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t >>= 2;
        s <<= 1;
    }

    Ok((z, x as u32, y as u32))
}
