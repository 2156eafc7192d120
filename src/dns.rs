//! DNS message parsing and construction.
//!
//! Covers what the flattener needs from RFC 1035: building a single
//! question for A, AAAA, MX or TXT, and reading the answer section back,
//! compression pointers included.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::resolver::DnsError;

pub const HEADER_LEN: usize = 12;

pub const FLAG_QR: u16 = 0x8000;
pub const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const RCODE_MASK: u16 = 0x000F;

const CLASS_IN: u16 = 1;
const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
/// Compression pointers followed while reading one name before giving up.
const MAX_POINTER_HOPS: usize = 32;

/// Record types the flattener asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Txt,
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordType::A),
            15 => Some(RecordType::Mx),
            16 => Some(RecordType::Txt),
            28 => Some(RecordType::Aaaa),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded answer data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Mx { preference: u16, exchange: String },
    /// The character-strings of one TXT record, in order.
    Txt(Vec<String>),
}

impl Record {
    fn decode(rtype: RecordType, rdata: &[u8]) -> Result<Self, DnsError> {
        match rtype {
            RecordType::A => {
                let octets: [u8; 4] = rdata
                    .try_into()
                    .map_err(|_| DnsError::Malformed("A record is not 4 bytes"))?;
                Ok(Record::A(Ipv4Addr::from(octets)))
            }
            RecordType::Aaaa => {
                let octets: [u8; 16] = rdata
                    .try_into()
                    .map_err(|_| DnsError::Malformed("AAAA record is not 16 bytes"))?;
                Ok(Record::Aaaa(Ipv6Addr::from(octets)))
            }
            RecordType::Mx => {
                let preference = rdata
                    .get(..2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .ok_or(DnsError::Malformed("MX record too short"))?;
                let (exchange, _) = read_name(rdata, 2)?;
                Ok(Record::Mx {
                    preference,
                    exchange,
                })
            }
            RecordType::Txt => {
                let mut fragments = Vec::new();
                let mut pos = 0;
                while pos < rdata.len() {
                    let len = rdata[pos] as usize;
                    let fragment = rdata
                        .get(pos + 1..pos + 1 + len)
                        .ok_or(DnsError::Malformed("TXT string runs past record"))?;
                    fragments.push(String::from_utf8_lossy(fragment).into_owned());
                    pos += 1 + len;
                }
                Ok(Record::Txt(fragments))
            }
        }
    }
}

/// A DNS query with a single question.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub domain: String,
    pub qtype: RecordType,
}

impl DnsQuery {
    pub fn new(id: u16, domain: &str, qtype: RecordType) -> Self {
        Self {
            id,
            domain: domain.trim_end_matches('.').to_ascii_lowercase(),
            qtype,
        }
    }

    /// Encode the query to wire format, recursion desired.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DnsError> {
        validate_name(&self.domain)?;

        let mut data = Vec::with_capacity(HEADER_LEN + self.domain.len() + 6);
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&FLAG_RD.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        encode_domain(&mut data, &self.domain);
        data.extend_from_slice(&self.qtype.code().to_be_bytes());
        data.extend_from_slice(&CLASS_IN.to_be_bytes());

        Ok(data)
    }

    /// Parse a DNS query from raw bytes.
    ///
    /// Returns `None` for anything that is not a single question of a type
    /// in [`RecordType`].
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 1 {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let (domain, pos) = read_name(data, HEADER_LEN).ok()?;
        if domain.is_empty() {
            return None;
        }

        let fixed = data.get(pos..pos + 4)?;
        let qtype = RecordType::from_code(u16::from_be_bytes([fixed[0], fixed[1]]))?;

        Some(Self { id, domain, qtype })
    }
}

/// A DNS response.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

/// A DNS question section entry.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A DNS resource record.
///
/// Names inside `rdata` are stored uncompressed so the record can be
/// decoded without the message it came from.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsRecord {
    pub fn a(name: &str, addr: Ipv4Addr) -> Self {
        Self::new(name, RecordType::A, addr.octets().to_vec())
    }

    pub fn aaaa(name: &str, addr: Ipv6Addr) -> Self {
        Self::new(name, RecordType::Aaaa, addr.octets().to_vec())
    }

    pub fn mx(name: &str, preference: u16, exchange: &str) -> Self {
        let mut rdata = preference.to_be_bytes().to_vec();
        encode_domain(&mut rdata, exchange);
        Self::new(name, RecordType::Mx, rdata)
    }

    /// A TXT record; each fragment must be at most 255 bytes.
    pub fn txt(name: &str, fragments: &[&str]) -> Self {
        let mut rdata = Vec::new();
        for fragment in fragments {
            rdata.push(fragment.len() as u8);
            rdata.extend_from_slice(fragment.as_bytes());
        }
        Self::new(name, RecordType::Txt, rdata)
    }

    fn new(name: &str, rtype: RecordType, rdata: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            rtype: rtype.code(),
            class: CLASS_IN,
            ttl: 300,
            rdata,
        }
    }
}

impl DnsResponse {
    /// Create a response to `query` with the given RCODE and answers.
    pub fn answer(query: &DnsQuery, rcode: u8, answers: Vec<DnsRecord>) -> Self {
        Self {
            id: query.id,
            flags: FLAG_QR | FLAG_RD | FLAG_RA | (rcode as u16 & RCODE_MASK),
            questions: vec![DnsQuestion {
                domain: query.domain.clone(),
                qtype: query.qtype.code(),
                qclass: CLASS_IN,
            }],
            answers,
        }
    }

    /// Parse a response from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, DnsError> {
        if data.len() < HEADER_LEN {
            return Err(DnsError::Malformed("message shorter than header"));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;
        let ancount = u16::from_be_bytes([data[6], data[7]]) as usize;

        let mut pos = HEADER_LEN;

        let mut questions = Vec::with_capacity(qdcount);
        for _ in 0..qdcount {
            let (domain, next) = read_name(data, pos)?;
            let fixed = data
                .get(next..next + 4)
                .ok_or(DnsError::Malformed("truncated question"))?;
            questions.push(DnsQuestion {
                domain,
                qtype: u16::from_be_bytes([fixed[0], fixed[1]]),
                qclass: u16::from_be_bytes([fixed[2], fixed[3]]),
            });
            pos = next + 4;
        }

        let mut answers = Vec::with_capacity(ancount);
        for _ in 0..ancount {
            let (name, next) = read_name(data, pos)?;
            let fixed = data
                .get(next..next + 10)
                .ok_or(DnsError::Malformed("truncated resource record"))?;
            let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
            let class = u16::from_be_bytes([fixed[2], fixed[3]]);
            let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
            let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;

            let start = next + 10;
            let raw = data
                .get(start..start + rdlength)
                .ok_or(DnsError::Malformed("rdata runs past end of message"))?;

            // MX exchanges may point back into the message; expand them here.
            let rdata = if rtype == RecordType::Mx.code() && raw.len() >= 3 {
                let (exchange, _) = read_name(data, start + 2)?;
                let mut expanded = raw[..2].to_vec();
                encode_domain(&mut expanded, &exchange);
                expanded
            } else {
                raw.to_vec()
            };

            answers.push(DnsRecord {
                name,
                rtype,
                class,
                ttl,
                rdata,
            });
            pos = start + rdlength;
        }

        Ok(Self {
            id,
            flags,
            questions,
            answers,
        })
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    /// Decode the answers of type `qtype`; CNAMEs and anything else in the
    /// answer section are skipped.
    pub fn records(&self, qtype: RecordType) -> Result<Vec<Record>, DnsError> {
        self.answers
            .iter()
            .filter(|a| a.rtype == qtype.code() && a.class == CLASS_IN)
            .map(|a| Record::decode(qtype, &a.rdata))
            .collect()
    }

    /// Encode the response to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        // Questions
        for q in &self.questions {
            encode_domain(&mut data, &q.domain);
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        // Answers
        for a in &self.answers {
            // Use compression pointer if this is the first question's domain
            if !self.questions.is_empty() && a.name == self.questions[0].domain {
                data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
            } else {
                encode_domain(&mut data, &a.name);
            }
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }
}

fn validate_name(domain: &str) -> Result<(), DnsError> {
    let valid = !domain.is_empty()
        && domain.len() <= MAX_NAME_LEN
        && domain
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN);

    if valid {
        Ok(())
    } else {
        Err(DnsError::InvalidName(domain.to_string()))
    }
}

/// Write `domain` as a sequence of labels. The empty name is the root.
fn encode_domain(buf: &mut Vec<u8>, domain: &str) {
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

/// Read a possibly compressed name starting at `start`.
///
/// Returns the lowercased name without a trailing dot, and the position
/// just past the name where it first appears, before any pointer.
fn read_name(data: &[u8], start: usize) -> Result<(String, usize), DnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut resume = None;
    let mut hops = 0;

    loop {
        let len = *data
            .get(pos)
            .ok_or(DnsError::Malformed("name runs past end of message"))? as usize;

        if len == 0 {
            pos += 1;
            break;
        }

        if len & 0xC0 == 0xC0 {
            let low = *data
                .get(pos + 1)
                .ok_or(DnsError::Malformed("truncated compression pointer"))?
                as usize;
            if resume.is_none() {
                resume = Some(pos + 2);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(DnsError::Malformed("compression pointer loop"));
            }
            pos = ((len & 0x3F) << 8) | low;
            continue;
        }

        if len > MAX_LABEL_LEN {
            return Err(DnsError::Malformed("label longer than 63 bytes"));
        }

        let label = data
            .get(pos + 1..pos + 1 + len)
            .ok_or(DnsError::Malformed("label runs past end of message"))?;
        labels.push(String::from_utf8_lossy(label).to_ascii_lowercase());
        pos += 1 + len;
    }

    Ok((labels.join("."), resume.unwrap_or(pos)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_to_bytes_sets_question() {
        let query = DnsQuery::new(0x1234, "Example.COM.", RecordType::Txt);
        let bytes = query.to_bytes().unwrap();

        assert_eq!(&bytes[..2], &[0x12, 0x34]);
        assert_eq!(&bytes[2..4], &[0x01, 0x00]); // RD
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);
        assert_eq!(&bytes[12..25], b"\x07example\x03com\x00");
        assert_eq!(&bytes[25..], &[0x00, 0x10, 0x00, 0x01]);
    }

    #[test]
    fn query_parse_reads_back_question() {
        let bytes = DnsQuery::new(7, "mail.example.org", RecordType::Mx)
            .to_bytes()
            .unwrap();
        let parsed = DnsQuery::parse(&bytes).unwrap();

        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.domain, "mail.example.org");
        assert_eq!(parsed.qtype, RecordType::Mx);
    }

    #[test]
    fn query_rejects_invalid_names() {
        let long_label = "a".repeat(64);

        assert!(DnsQuery::new(1, "", RecordType::A).to_bytes().is_err());
        assert!(DnsQuery::new(1, "a..b", RecordType::A).to_bytes().is_err());
        assert!(
            DnsQuery::new(1, &format!("{long_label}.com"), RecordType::A)
                .to_bytes()
                .is_err()
        );
    }

    #[test]
    fn parse_decodes_compressed_answers() {
        let query = DnsQuery::new(42, "example.com", RecordType::A);
        let response = DnsResponse::answer(
            &query,
            0,
            vec![
                DnsRecord::a("example.com", Ipv4Addr::new(192, 0, 2, 1)),
                DnsRecord::a("example.com", Ipv4Addr::new(192, 0, 2, 2)),
            ],
        );
        let parsed = DnsResponse::parse(&response.to_bytes()).unwrap();

        assert_eq!(parsed.id, 42);
        assert!(parsed.is_response());
        assert!(!parsed.is_truncated());
        assert_eq!(parsed.rcode(), 0);
        assert_eq!(parsed.answers[0].name, "example.com");
        assert_eq!(
            parsed.records(RecordType::A).unwrap(),
            vec![
                Record::A(Ipv4Addr::new(192, 0, 2, 1)),
                Record::A(Ipv4Addr::new(192, 0, 2, 2)),
            ]
        );
    }

    #[test]
    fn records_skip_other_types() {
        let query = DnsQuery::new(1, "example.com", RecordType::Aaaa);
        let response = DnsResponse::answer(
            &query,
            0,
            vec![
                DnsRecord::a("example.com", Ipv4Addr::new(192, 0, 2, 1)),
                DnsRecord::aaaa("example.com", "2001:db8::1".parse().unwrap()),
            ],
        );
        let parsed = DnsResponse::parse(&response.to_bytes()).unwrap();

        assert_eq!(
            parsed.records(RecordType::Aaaa).unwrap(),
            vec![Record::Aaaa("2001:db8::1".parse().unwrap())]
        );
    }

    #[test]
    fn txt_keeps_fragments_in_order() {
        let query = DnsQuery::new(1, "example.com", RecordType::Txt);
        let response = DnsResponse::answer(
            &query,
            0,
            vec![DnsRecord::txt("example.com", &["v=spf1 ip4:192.0.2.0/24", " -all"])],
        );
        let parsed = DnsResponse::parse(&response.to_bytes()).unwrap();

        assert_eq!(
            parsed.records(RecordType::Txt).unwrap(),
            vec![Record::Txt(vec![
                "v=spf1 ip4:192.0.2.0/24".to_string(),
                " -all".to_string(),
            ])]
        );
    }

    #[test]
    fn mx_exchange_pointer_is_expanded() {
        // Hand-built: MX answer whose exchange is "mail" + pointer to "example.com".
        let query = DnsQuery::new(9, "example.com", RecordType::Mx);
        let mut bytes = DnsResponse::answer(&query, 0, Vec::new()).to_bytes();
        bytes[7] = 1; // ANCOUNT
        bytes.extend_from_slice(&[0xC0, 0x0C]); // owner name
        bytes.extend_from_slice(&[0x00, 0x0F, 0x00, 0x01]); // MX, IN
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x2C]); // TTL
        bytes.extend_from_slice(&[0x00, 0x09]); // RDLENGTH
        bytes.extend_from_slice(&[0x00, 0x0A]); // preference 10
        bytes.extend_from_slice(b"\x04mail\xC0\x0C");

        let parsed = DnsResponse::parse(&bytes).unwrap();

        assert_eq!(
            parsed.records(RecordType::Mx).unwrap(),
            vec![Record::Mx {
                preference: 10,
                exchange: "mail.example.com".to_string(),
            }]
        );
    }

    #[test]
    fn parse_reports_rcode_and_truncation() {
        let query = DnsQuery::new(3, "missing.example", RecordType::Txt);
        let mut response = DnsResponse::answer(&query, 3, Vec::new());
        response.flags |= FLAG_TC;
        let parsed = DnsResponse::parse(&response.to_bytes()).unwrap();

        assert_eq!(parsed.rcode(), 3);
        assert!(parsed.is_truncated());
        assert!(parsed.answers.is_empty());
    }

    #[test]
    fn parse_rejects_short_and_looping_messages() {
        assert!(DnsResponse::parse(&[0u8; 5]).is_err());

        let query = DnsQuery::new(1, "example.com", RecordType::A);
        let mut bytes = DnsResponse::answer(&query, 0, Vec::new()).to_bytes();
        bytes[7] = 1;
        let self_pointer = bytes.len() as u8;
        bytes.extend_from_slice(&[0xC0, self_pointer]);

        assert!(matches!(
            DnsResponse::parse(&bytes),
            Err(DnsError::Malformed(_))
        ));
    }
}
