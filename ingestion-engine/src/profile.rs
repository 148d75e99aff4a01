use bytes::Bytes;
use common::error::AppError;

use crate::types::StructuredProfile;

/// Extract schema metadata from CSV bytes: first row as headers, remaining
/// records counted. Other structured formats are recorded without a profile.
pub fn profile_csv(bytes: &Bytes) -> Result<StructuredProfile, AppError> {
    let mut reader = csv::Reader::from_reader(bytes.as_ref());

    let column_headers: Vec<String> = reader
        .headers()
        .map_err(|err| AppError::Profile(format!("Failed to parse CSV headers: {err}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut row_count: u64 = 0;
    for record in reader.records() {
        record.map_err(|err| {
            AppError::Profile(format!("Failed to parse CSV row {}: {err}", row_count + 1))
        })?;
        row_count += 1;
    }

    Ok(StructuredProfile {
        column_headers,
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_and_rows_are_profiled() {
        let csv = Bytes::from_static(b"date,amount\n2024-01-01,10\n2024-01-02,12\n");
        let profile = profile_csv(&csv).expect("profile");
        assert_eq!(profile.column_headers, vec!["date", "amount"]);
        assert_eq!(profile.row_count, 2);
    }

    #[test]
    fn header_only_file_counts_zero_rows() {
        let csv = Bytes::from_static(b"id,name\n");
        let profile = profile_csv(&csv).expect("profile");
        assert_eq!(profile.column_headers, vec!["id", "name"]);
        assert_eq!(profile.row_count, 0);
    }

    #[test]
    fn ragged_rows_are_a_profile_error() {
        let csv = Bytes::from_static(b"a,b\n1,2\n3,2,1\n");
        let err = profile_csv(&csv).expect_err("must fail");
        assert!(matches!(err, AppError::Profile(_)));
    }

    #[test]
    fn quoted_fields_are_handled() {
        let csv = Bytes::from_static(b"name,notes\nwheat,\"yield, early\"\n");
        let profile = profile_csv(&csv).expect("profile");
        assert_eq!(profile.row_count, 1);
    }
}
