//! DNS answers as records

use crate::record::Record;
use crate::transport::DnsRecord;

/// One record per answer: `name`, `type`, `class`, `ttl`, `rdata`
///
/// TXT data loses its surrounding quotes and, with a non-empty `split`
/// delimiter, becomes one record per piece.
pub fn dns_records(answers: &[DnsRecord], split: Option<&str>) -> Vec<Record> {
    let split = split.filter(|s| !s.is_empty());
    let mut records = Vec::new();

    for answer in answers {
        let pieces: Vec<&str> = if answer.record_type.eq_ignore_ascii_case("TXT") {
            let text = answer.rdata.trim_matches('"');
            match split {
                Some(delimiter) => text.split(delimiter).collect(),
                None => vec![text],
            }
        } else {
            vec![answer.rdata.as_str()]
        };

        for piece in pieces {
            let mut record = Record::new();
            record.insert("name", answer.name.as_str());
            record.insert("type", answer.record_type.as_str());
            record.insert("class", "IN");
            record.insert("ttl", answer.ttl);
            record.insert("rdata", piece);
            records.push(record);
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answer(record_type: &str, rdata: &str) -> DnsRecord {
        DnsRecord {
            name: "example.com.".into(),
            ttl: 300,
            record_type: record_type.into(),
            rdata: rdata.into(),
        }
    }

    #[test]
    fn test_field_order_and_values() {
        let records = dns_records(&[answer("A", "93.184.216.34")], None);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].keys().collect::<Vec<_>>(),
            vec!["name", "type", "class", "ttl", "rdata"]
        );
        assert_eq!(records[0].get("ttl"), Some(&json!(300)));
        assert_eq!(records[0].get("class"), Some(&json!("IN")));
        assert_eq!(records[0].get("rdata"), Some(&json!("93.184.216.34")));
    }

    #[test]
    fn test_txt_split() {
        let records = dns_records(&[answer("TXT", "\"v=spf1 a mx -all\"")], Some(" "));
        let pieces: Vec<_> = records.iter().map(|r| r.get("rdata").cloned()).collect();
        assert_eq!(
            pieces,
            vec![
                Some(json!("v=spf1")),
                Some(json!("a")),
                Some(json!("mx")),
                Some(json!("-all"))
            ]
        );
    }

    #[test]
    fn test_split_only_applies_to_txt() {
        let records = dns_records(&[answer("MX", "10 mail.example.com.")], Some(" "));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("rdata"), Some(&json!("10 mail.example.com.")));
    }
}
