use crate::pipeline::segment::Segmentation;
use crate::signal::{Condition, Epoch};
use serde::{Deserialize, Serialize};

/// Sample-wise average of all epochs of one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evoked {
    pub condition: Condition,
    pub n_epochs: usize,
    pub channels: [Vec<f64>; 2],
}

/// Average `epochs` sample by sample over their common length.
///
/// Returns `None` when there is nothing to average. All epochs are assumed to
/// share `condition`.
pub fn evoked(condition: Condition, epochs: &[Epoch]) -> Option<Evoked> {
    let len = epochs.iter().map(|e| e.len()).min()?;
    let n = epochs.len() as f64;
    let channels = std::array::from_fn(|c| {
        (0..len)
            .map(|i| epochs.iter().map(|e| e.channels[c][i]).sum::<f64>() / n)
            .collect()
    });
    Some(Evoked {
        condition,
        n_epochs: epochs.len(),
        channels,
    })
}

/// Evoked responses for every condition that has at least one epoch.
pub fn evoked_by_condition(segmentation: &Segmentation) -> Vec<Evoked> {
    Condition::ALL
        .iter()
        .filter_map(|&c| evoked(c, segmentation.epochs(c)))
        .collect()
}
