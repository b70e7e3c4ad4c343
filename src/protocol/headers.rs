use crate::error::{ProtocolErrorKind, Result, VoipError};

/// The header block of a signalling message.
///
/// The five headers every valid message must carry (Via, From, To,
/// Call-ID, CSeq) are explicit fields, so a parsed message can never be
/// read before they are known to exist. Contact is optional; anything
/// else lands in an insertion-ordered overflow list.
///
/// Lookup is case-insensitive; serialization emits the mandatory fields
/// in canonical order followed by the overflow headers as received.
#[derive(Debug, Clone)]
pub struct Headers {
    pub via: String,
    pub from: String,
    pub to: String,
    pub call_id: String,
    pub cseq: String,
    pub contact: Option<String>,
    extras: Vec<(String, String)>,
}

impl Headers {
    pub fn new(via: String, from: String, to: String, call_id: String, cseq: String) -> Self {
        Headers {
            via,
            from,
            to,
            call_id,
            cseq,
            contact: None,
            extras: Vec::new(),
        }
    }

    /// Build from raw `(name, value)` pairs, enforcing the mandatory set.
    ///
    /// Fails with [`VoipError::Protocol`] naming the first absent
    /// mandatory header.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self> {
        fn take(pairs: &[(String, String)], name: &'static str) -> Result<String> {
            pairs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
                .ok_or_else(|| VoipError::protocol(ProtocolErrorKind::MissingHeader(name)))
        }

        let via = take(&pairs, "Via")?;
        let from = take(&pairs, "From")?;
        let to = take(&pairs, "To")?;
        let call_id = take(&pairs, "Call-ID")?;
        let cseq = take(&pairs, "CSeq")?;
        let contact = pairs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("Contact"))
            .map(|(_, value)| value.clone());

        const KNOWN: [&str; 6] = ["Via", "From", "To", "Call-ID", "CSeq", "Contact"];
        let extras = pairs
            .into_iter()
            .filter(|(key, _)| !KNOWN.iter().any(|k| key.eq_ignore_ascii_case(k)))
            .collect();

        Ok(Headers {
            via,
            from,
            to,
            call_id,
            cseq,
            contact,
            extras,
        })
    }

    /// Look up any header by name (case-insensitive), mandatory or overflow.
    pub fn get(&self, name: &str) -> Option<&str> {
        for (field, value) in [
            ("Via", Some(self.via.as_str())),
            ("From", Some(self.from.as_str())),
            ("To", Some(self.to.as_str())),
            ("Call-ID", Some(self.call_id.as_str())),
            ("CSeq", Some(self.cseq.as_str())),
            ("Contact", self.contact.as_deref()),
        ] {
            if name.eq_ignore_ascii_case(field) {
                return value;
            }
        }
        self.extras
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Append an overflow header, preserving insertion order.
    pub fn push_extra(&mut self, name: &str, value: &str) {
        self.extras.push((name.to_string(), value.to_string()));
    }

    /// Serialize the header block, without the terminating blank line.
    pub fn serialize_into(&self, out: &mut String) {
        out.push_str(&format!("Via: {}\r\n", self.via));
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("To: {}\r\n", self.to));
        out.push_str(&format!("Call-ID: {}\r\n", self.call_id));
        out.push_str(&format!("CSeq: {}\r\n", self.cseq));
        if let Some(contact) = &self.contact {
            out.push_str(&format!("Contact: {}\r\n", contact));
        }
        for (name, value) in &self.extras {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
    }

    /// Extract the `tag` parameter from the To or From header value.
    ///
    /// Header values look like `<sip:user@host>;tag=1234`.
    pub fn tag_of(value: &str) -> Option<&str> {
        value
            .split_once("tag=")
            .map(|(_, rest)| rest.split(';').next().unwrap_or(rest).trim())
            .filter(|tag| !tag.is_empty())
    }
}
