use crate::application::dispatcher::{DispatchOutcome, DispatchReport};
use crate::domain::payout::PayoutState;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct ReportRow<'a> {
    reference: &'a str,
    outcome: DispatchOutcome,
    state: Option<PayoutState>,
    reason: Option<&'a str>,
}

/// Writes dispatch reports as CSV: `reference, outcome, state, reason`.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_reports(&mut self, reports: &[DispatchReport]) -> Result<()> {
        for report in reports {
            self.writer.serialize(ReportRow {
                reference: &report.reference,
                outcome: report.outcome,
                state: report.state,
                reason: report.reason.as_deref(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_rows() {
        let reports = vec![
            DispatchReport {
                reference: "R1".to_string(),
                outcome: DispatchOutcome::Accepted,
                reason: None,
                state: Some(PayoutState::Dispatched),
            },
            DispatchReport {
                reference: "R2".to_string(),
                outcome: DispatchOutcome::Rejected,
                reason: Some("rejected by provider: invalid msisdn".to_string()),
                state: Some(PayoutState::Created),
            },
        ];

        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_reports(&reports).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "reference,outcome,state,reason\n\
             R1,accepted,DISPATCHED,\n\
             R2,rejected,CREATED,rejected by provider: invalid msisdn\n"
        );
    }
}
