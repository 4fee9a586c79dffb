//! Minimal ASTC 4x4 container.
//!
//! Every 4x4 tile is written as a constant-colour ("void extent") block holding the
//! tile's average colour. The output is a valid `.astc` file that drops per-pixel
//! detail inside a tile.

use super::{PersistenceError, PixelMap};

const MAGIC: [u8; 4] = [0x13, 0xAB, 0xA1, 0x5C];
const BLOCK: u32 = 4;
const HEADER_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
/// Void-extent LDR block mode with "no extent" coordinates.
const VOID_EXTENT_LOW: u64 = 0xFFFF_FFFF_FFFF_FDFC;

fn blocks(len: u32) -> u32 {
    len.div_ceil(BLOCK)
}

fn put_u24(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

fn get_u24(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

pub fn encode(pixel_map: &PixelMap) -> Result<Vec<u8>, PersistenceError> {
    pixel_map.validate()?;
    let (width, height) = (pixel_map.width, pixel_map.height);
    let (bx, by) = (blocks(width), blocks(height));

    let mut out = Vec::with_capacity(HEADER_LEN + (bx * by) as usize * BLOCK_LEN);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&[BLOCK as u8, BLOCK as u8, 1]);
    put_u24(&mut out, width);
    put_u24(&mut out, height);
    put_u24(&mut out, 1);

    for block_y in 0..by {
        for block_x in 0..bx {
            let mut sum = [0u32; 4];
            let mut count = 0u32;
            for y in block_y * BLOCK..((block_y + 1) * BLOCK).min(height) {
                for x in block_x * BLOCK..((block_x + 1) * BLOCK).min(width) {
                    let idx = ((y * width + x) * 4) as usize;
                    for (channel, total) in sum.iter_mut().enumerate() {
                        *total += pixel_map.data[idx + channel] as u32;
                    }
                    count += 1;
                }
            }
            out.extend_from_slice(&VOID_EXTENT_LOW.to_le_bytes());
            for total in sum {
                let avg = (total + count / 2) / count.max(1);
                out.extend_from_slice(&((avg * 257) as u16).to_le_bytes());
            }
        }
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<PixelMap, PersistenceError> {
    if bytes.len() < HEADER_LEN || bytes[..4] != MAGIC {
        return Err(PersistenceError::Corrupt("missing astc header".into()));
    }
    if bytes[4] as u32 != BLOCK || bytes[5] as u32 != BLOCK || bytes[6] != 1 {
        return Err(PersistenceError::Corrupt("unsupported astc block size".into()));
    }
    let width = get_u24(&bytes[7..10]);
    let height = get_u24(&bytes[10..13]);
    let (bx, by) = (blocks(width), blocks(height));
    let expected = HEADER_LEN + (bx * by) as usize * BLOCK_LEN;
    if width == 0 || height == 0 || bytes.len() < expected {
        return Err(PersistenceError::Corrupt("truncated astc payload".into()));
    }

    let mut data = vec![0u8; (width * height * 4) as usize];
    for block_y in 0..by {
        for block_x in 0..bx {
            let offset = HEADER_LEN + ((block_y * bx + block_x) as usize) * BLOCK_LEN;
            let block = &bytes[offset..offset + BLOCK_LEN];
            let mut low = [0u8; 8];
            low.copy_from_slice(&block[..8]);
            if u64::from_le_bytes(low) & 0x1FF != 0x1FC {
                return Err(PersistenceError::Corrupt(
                    "only constant-colour astc blocks are supported".into(),
                ));
            }
            let mut rgba = [0u8; 4];
            for (channel, value) in rgba.iter_mut().enumerate() {
                let at = 8 + channel * 2;
                *value = (u16::from_le_bytes([block[at], block[at + 1]]) >> 8) as u8;
            }
            for y in block_y * BLOCK..((block_y + 1) * BLOCK).min(height) {
                for x in block_x * BLOCK..((block_x + 1) * BLOCK).min(width) {
                    let idx = ((y * width + x) * 4) as usize;
                    data[idx..idx + 4].copy_from_slice(&rgba);
                }
            }
        }
    }
    Ok(PixelMap {
        width,
        height,
        data,
    })
}
