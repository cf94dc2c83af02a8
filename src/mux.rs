//! Probe multiplexer groups.
//!
//! Channels of a probe are sampled in mux groups; channels in the same group
//! are sampled at the same instant. Group `g` of a table with `G` groups holds
//! channels `{2g, 2g + 1} + 2G·k`.

use acq_core::{AcqError, AcqResult, AcquisitionServer, ChannelSet};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

/// Mux groups of one probe part number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxTable {
    groups: Vec<Vec<u32>>,
}

impl MuxTable {
    fn interleaved(n_groups: u32, per_group: u32) -> Self {
        let groups = (0..n_groups)
            .map(|g| {
                (0..per_group / 2)
                    .flat_map(|k| {
                        let base = 2 * g + 2 * n_groups * k;
                        [base, base + 1]
                    })
                    .collect()
            })
            .collect();
        Self { groups }
    }

    /// Number of groups.
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Channels in group `g`, ascending.
    pub fn group(&self, g: usize) -> Option<&[u32]> {
        self.groups.get(g).map(Vec::as_slice)
    }

    /// Group containing `channel`.
    pub fn group_of(&self, channel: u32) -> Option<usize> {
        self.groups.iter().position(|group| group.contains(&channel))
    }
}

static MUX_TABLES: Lazy<HashMap<&'static str, MuxTable>> = Lazy::new(|| {
    let np1 = MuxTable::interleaved(12, 32);
    let np2 = MuxTable::interleaved(16, 24);
    let mut tables = HashMap::new();
    tables.insert("NP1100", np1.clone());
    tables.insert("PRB_1_4_0480_1_C", np1);
    tables.insert("NP2013", np2);
    tables
});

/// Mux table for a probe part number.
pub fn mux_table(part_number: &str) -> Option<&'static MuxTable> {
    MUX_TABLES.get(part_number)
}

/// Keep only the channels sampled in the same mux group as `muxed_with`.
///
/// An unknown part number or a `muxed_with` channel outside every group
/// leaves `channels` unchanged and logs a warning. An empty result is a
/// configuration error.
pub fn filter_by_mux(channels: &ChannelSet, part_number: &str, muxed_with: u32) -> AcqResult<ChannelSet> {
    let Some(table) = mux_table(part_number) else {
        warn!(part_number, "no mux table for probe part number, channels unchanged");
        return Ok(channels.clone());
    };
    let Some(g) = table.group_of(muxed_with) else {
        warn!(part_number, channel = muxed_with, "channel not in any mux group, channels unchanged");
        return Ok(channels.clone());
    };

    let group = table.groups[g].as_slice();
    let kept: Vec<u32> = channels
        .as_slice()
        .iter()
        .copied()
        .filter(|ch| group.contains(ch))
        .collect();
    if kept.is_empty() {
        return Err(AcqError::configuration(format!(
            "no requested channel shares mux group {} with channel {}",
            g, muxed_with
        )));
    }
    ChannelSet::new(kept)
}

/// Read a probe's head part number from its geometry map.
pub fn probe_part_number(server: &mut dyn AcquisitionServer, probe: u32) -> AcqResult<String> {
    server
        .geom_map(probe)?
        .iter()
        .find_map(|entry| entry.strip_prefix("head_partNumber="))
        .map(|pn| pn.trim().to_string())
        .ok_or_else(|| {
            AcqError::protocol(
                "get_geom_map",
                format!("no head_partNumber entry for probe {}", probe),
            )
        })
}
