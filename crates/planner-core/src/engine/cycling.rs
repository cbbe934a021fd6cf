//! Title cycling: instances project forward through the item list from the
//! series' completion count.

use uuid::Uuid;

use crate::models::{CyclingConfig, CyclingMode};

/// Title for the instance at `offset` within the current build, given the
/// series' total completion count. Returns `None` when cycling has no items.
pub fn cycling_title(
    config: &CyclingConfig,
    series_id: Uuid,
    completion_count: usize,
    offset: usize,
) -> Option<String> {
    if config.items.is_empty() {
        return None;
    }
    let position = completion_count + offset;
    let index = match config.mode {
        CyclingMode::Sequential => position % config.items.len(),
        CyclingMode::Random => {
            let hash = string_hash(&format!("{}:{}", series_id, position));
            hash as usize % config.items.len()
        }
    };
    Some(config.items[index].clone())
}

/// Multiplicative string hash, truncated to 32 bits and absolute-valued.
/// Determinism matters; distribution barely does.
fn string_hash(s: &str) -> u32 {
    let mut hash: i32 = 0;
    for c in s.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(c as i32);
    }
    hash.unsigned_abs()
}
