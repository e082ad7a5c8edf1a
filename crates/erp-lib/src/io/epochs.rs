use crate::error::{PipelineError, Result};
use crate::pipeline::segment::Segmentation;
use crate::signal::{Condition, Epoch};
use csv::WriterBuilder;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const EPOCH_COLUMNS: [&str; 5] = ["epoch", "condition", "start_row", "end_row", "sample"];

/// Write epochs in long format: one row per sample, one column per channel.
pub fn write_epochs_csv<W: Write>(writer: W, epochs: &[Epoch], channel_names: [&str; 2]) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    let mut header: Vec<&str> = EPOCH_COLUMNS.to_vec();
    header.extend(channel_names);
    wtr.write_record(&header)?;
    for (id, epoch) in epochs.iter().enumerate() {
        for sample in 0..epoch.len() {
            wtr.write_record([
                id.to_string(),
                epoch.condition.to_string(),
                epoch.start_row.to_string(),
                epoch.end_row.to_string(),
                sample.to_string(),
                epoch.channels[0][sample].to_string(),
                epoch.channels[1][sample].to_string(),
            ])?;
        }
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// One row per epoch: class label (A = 0, B = 1) then the feature vector.
/// Condition A epochs come first.
pub fn write_feature_csv<W: Write>(writer: W, segmentation: &Segmentation) -> Result<()> {
    let mut wtr = WriterBuilder::new().flexible(false).from_writer(writer);
    let width = segmentation
        .a
        .iter()
        .chain(&segmentation.b)
        .map(|e| e.channels[0].len() + e.channels[1].len())
        .next()
        .unwrap_or(0);
    let mut header = vec!["label".to_string()];
    header.extend((0..width).map(|i| format!("f{i}")));
    wtr.write_record(&header)?;
    for condition in Condition::ALL {
        for epoch in segmentation.epochs(condition) {
            let mut row = vec![condition.class_label().to_string()];
            row.extend(epoch.feature_vector().iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|err| PipelineError::io(path, err))
}

/// Write `epochs_A.csv`, `epochs_B.csv` and `features.csv` into `dir`.
pub fn write_epoch_tables(
    dir: &Path,
    segmentation: &Segmentation,
    channel_names: [&str; 2],
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))?;
    let mut written = Vec::new();
    for condition in Condition::ALL {
        let path = dir.join(format!("epochs_{condition}.csv"));
        write_epochs_csv(create(&path)?, segmentation.epochs(condition), channel_names)?;
        written.push(path);
    }
    let path = dir.join("features.csv");
    write_feature_csv(create(&path)?, segmentation)?;
    written.push(path);
    Ok(written)
}
