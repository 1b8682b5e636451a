use std::io::Write;

use crate::models::SubmissionSummary;

pub fn write_csv<W: Write>(writer: W, summaries: &[SubmissionSummary]) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for summary in summaries {
        csv_writer.serialize(summary)?;
    }
    csv_writer.flush()?;
    Ok(())
}
