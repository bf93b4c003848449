//! Deterministic, collision-avoiding port assignment.
//!
//! Every environment gets one offset in `[0, OFFSET_RANGE)` shared by all of
//! its ports. Offsets are never stored: they are recomputed from the names
//! and creation order of the live environments each time they are needed.

use crate::CoreError;
use serde::Serialize;
use sprig_schema::{EnvName, PortsSection};
use std::time::SystemTime;

pub const OFFSET_RANGE: u16 = 100;

/// Ports one environment listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortSet {
    pub offset: u16,
    pub https: u16,
    pub http: u16,
    pub vite: u16,
}

impl PortSet {
    pub fn from_offset(offset: u16, bases: PortsSection) -> Result<Self, CoreError> {
        Ok(Self {
            offset,
            https: shift(bases.https, offset)?,
            http: shift(bases.http, offset)?,
            vite: shift(bases.vite, offset)?,
        })
    }

    /// Browser remote-debugging port, derived from the same offset.
    pub fn debug_port(&self, base: u16) -> Result<u16, CoreError> {
        shift(base, self.offset)
    }
}

fn shift(base: u16, offset: u16) -> Result<u16, CoreError> {
    base.checked_add(offset).ok_or_else(|| {
        CoreError::Configuration(format!("port base {base} + offset {offset} exceeds 65535"))
    })
}

/// A live environment of the same project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub name: String,
    pub created: Option<SystemTime>,
}

/// Preferred offset for `name`: its trailing number mod 100, else a stable
/// hash into the upper half of the range.
pub fn base_offset(name: &str) -> u16 {
    match EnvName::parse(name).ok().and_then(|n| n.numeric_suffix()) {
        Some(n) => (n % u64::from(OFFSET_RANGE)) as u16,
        None => 50 + (stable_hash(name) % 50) as u16,
    }
}

/// First 8 bytes (little endian) of the blake3 digest.
fn stable_hash(name: &str) -> u64 {
    let digest = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// First free offset at or after `base`, wrapping once around the range.
fn first_free(base: u16, taken: &[bool; OFFSET_RANGE as usize]) -> Option<u16> {
    (0..OFFSET_RANGE)
        .map(|step| (base + step) % OFFSET_RANGE)
        .find(|o| !taken[*o as usize])
}

/// Offsets of every sibling, oldest first (creation time, then name). An
/// entry is `None` only when the range was already full when its turn came.
pub fn assign_offsets(siblings: &[Sibling]) -> Vec<(String, Option<u16>)> {
    let mut ordered: Vec<&Sibling> = siblings.iter().collect();
    ordered.sort_by(|a, b| {
        (a.created.is_none(), a.created, &a.name).cmp(&(b.created.is_none(), b.created, &b.name))
    });
    let mut taken = [false; OFFSET_RANGE as usize];
    ordered
        .into_iter()
        .map(|s| {
            let offset = first_free(base_offset(&s.name), &taken);
            if let Some(o) = offset {
                taken[o as usize] = true;
            }
            (s.name.clone(), offset)
        })
        .collect()
}

/// Port set for `name` given the live siblings. When `name` is itself among
/// the siblings its established offset is returned; otherwise it is placed
/// after every existing environment.
pub fn allocate(
    siblings: &[Sibling],
    name: &str,
    bases: PortsSection,
    project: &str,
) -> Result<PortSet, CoreError> {
    let assigned = assign_offsets(siblings);
    if let Some((_, offset)) = assigned.iter().find(|(n, _)| n == name) {
        let offset = offset.ok_or_else(|| CoreError::PortsExhausted(project.to_owned()))?;
        return PortSet::from_offset(offset, bases);
    }
    let mut taken = [false; OFFSET_RANGE as usize];
    for o in assigned.iter().filter_map(|(_, o)| *o) {
        taken[o as usize] = true;
    }
    let offset = first_free(base_offset(name), &taken)
        .ok_or_else(|| CoreError::PortsExhausted(project.to_owned()))?;
    tracing::debug!(
        "offset {offset} for {name} (base {}, {} siblings)",
        base_offset(name),
        siblings.len()
    );
    PortSet::from_offset(offset, bases)
}
