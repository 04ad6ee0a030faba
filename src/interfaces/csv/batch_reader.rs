use crate::application::dispatcher::{BatchItem, InvalidItem, PayoutRequest};
use crate::domain::payout::Destination;
use crate::error::{PayoutError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One CSV row. Destination columns not used by the row's rail stay empty.
#[derive(Debug, Deserialize)]
struct BatchRow {
    reference: String,
    beneficiary_id: String,
    amount: Decimal,
    destination: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    account_number: Option<String>,
    #[serde(default)]
    bank_code: Option<String>,
}

impl TryFrom<BatchRow> for PayoutRequest {
    type Error = PayoutError;

    fn try_from(row: BatchRow) -> Result<Self> {
        let destination = match row.destination.to_ascii_lowercase().as_str() {
            "mobile_money" => Destination::MobileMoney {
                phone: required(row.phone, "phone", &row.reference)?,
            },
            "bank_account" => Destination::BankAccount {
                account_number: required(
                    row.account_number,
                    "account_number",
                    &row.reference,
                )?,
                bank_code: required(row.bank_code, "bank_code", &row.reference)?,
            },
            other => {
                return Err(PayoutError::ValidationError(format!(
                    "Unknown destination type {other:?} for {}",
                    row.reference
                )));
            }
        };

        Ok(PayoutRequest {
            reference: row.reference,
            beneficiary_id: row.beneficiary_id,
            amount: row.amount,
            destination,
        })
    }
}

fn required(value: Option<String>, column: &str, reference: &str) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        PayoutError::ValidationError(format!("Missing {column} for {reference}"))
    })
}

/// Reads a payout batch from a CSV source.
///
/// Columns: `reference, beneficiary_id, amount, destination, phone,
/// account_number, bank_code`, where `destination` is `mobile_money` or
/// `bank_account`. Whitespace is trimmed and short rows are accepted.
pub struct BatchReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> BatchReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads rows in file order. A row that cannot be converted becomes
    /// [`BatchItem::Invalid`] carrying whatever reference it has, so it is still
    /// answered in the report. Fails only when the header cannot be read.
    pub fn items(mut self) -> Result<impl Iterator<Item = BatchItem>> {
        let headers = self.reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|header| header == name);
        let reference_col = column("reference");
        let beneficiary_col = column("beneficiary_id");

        Ok(self.reader.into_records().map(move |record| {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    return BatchItem::Invalid(InvalidItem {
                        reference: String::new(),
                        beneficiary_id: String::new(),
                        reason: PayoutError::from(e).to_string(),
                    });
                }
            };

            let converted = record
                .deserialize::<BatchRow>(Some(&headers))
                .map_err(PayoutError::from)
                .and_then(PayoutRequest::try_from);
            match converted {
                Ok(request) => BatchItem::Request(request),
                Err(e) => {
                    let field = |col: Option<usize>| {
                        col.and_then(|col| record.get(col))
                            .unwrap_or_default()
                            .to_string()
                    };
                    BatchItem::Invalid(InvalidItem {
                        reference: field(reference_col),
                        beneficiary_id: field(beneficiary_col),
                        reason: e.to_string(),
                    })
                }
            }
        }))
    }
}
