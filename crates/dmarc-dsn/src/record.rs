use serde::{Deserialize, Serialize};

/// The delivery action reported for a recipient.
///
/// Anything that isn't one of the RFC 3464 action names (or our own
/// synthetic `any_reason`) is carried through verbatim.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
#[serde(from = "String", into = "String")]
pub enum DsnAction {
    Failed,
    Delayed,
    Delivered,
    Relayed,
    Expanded,
    /// Recorded by the extension-guided strategy, which only knows
    /// that the report bounced, not why.
    AnyReason,
    Other(String),
}

impl From<String> for DsnAction {
    fn from(s: String) -> DsnAction {
        match s.trim().to_ascii_lowercase().as_str() {
            "failed" => Self::Failed,
            "delayed" => Self::Delayed,
            "delivered" => Self::Delivered,
            "relayed" => Self::Relayed,
            "expanded" => Self::Expanded,
            "any_reason" => Self::AnyReason,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for DsnAction {
    fn from(s: &str) -> DsnAction {
        s.to_string().into()
    }
}

impl From<DsnAction> for String {
    fn from(a: DsnAction) -> String {
        a.to_string()
    }
}

impl std::fmt::Display for DsnAction {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::Failed => "failed",
            Self::Delayed => "delayed",
            Self::Delivered => "delivered",
            Self::Relayed => "relayed",
            Self::Expanded => "expanded",
            Self::AnyReason => "any_reason",
            Self::Other(s) => s.as_str(),
        };
        fmt.write_str(s)
    }
}

/// One extracted bounce event, as persisted to a per-domain log file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DsnRecord {
    pub orig_rcpt: String,
    #[serde(default)]
    pub final_rcpt: Option<String>,
    #[serde(default = "default_action")]
    pub action: DsnAction,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub diag_code: Option<String>,
    #[serde(default)]
    pub report_domain: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

fn default_action() -> DsnAction {
    DsnAction::Failed
}

impl DsnRecord {
    pub fn new(orig_rcpt: impl Into<String>, action: DsnAction) -> Self {
        Self {
            orig_rcpt: orig_rcpt.into(),
            final_rcpt: None,
            action,
            status: None,
            diag_code: None,
            report_domain: None,
            date: None,
        }
    }

    /// Serialize as a single newline-terminated JSON line
    pub fn to_json_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Why a message was set aside in the `saved/` directory.
/// The reason becomes the extension of the saved file name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SaveReason {
    NoSubjectReMatch,
    NoSubjectDomainName,
    NoReportDomain,
    NoReportDomainInReferencesHeader,
    NoReportRcptInExtension,
    NoReportDomainInMessage,
    NoDsnDetails,
}

impl SaveReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoSubjectReMatch => "no_subject_re_match",
            Self::NoSubjectDomainName => "no_subject_domainname",
            Self::NoReportDomain => "no_report_domain",
            Self::NoReportDomainInReferencesHeader => "no_report_domain_in_references_header",
            Self::NoReportRcptInExtension => "no_report_rcpt_in_extension",
            Self::NoReportDomainInMessage => "no_report_domain_in_message",
            Self::NoDsnDetails => "no_dsn_details",
        }
    }
}

impl std::fmt::Display for SaveReason {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn action_names() {
        k9::assert_equal!(DsnAction::from("failed"), DsnAction::Failed);
        k9::assert_equal!(DsnAction::from(" Delayed "), DsnAction::Delayed);
        k9::assert_equal!(DsnAction::from("any_reason"), DsnAction::AnyReason);
        k9::assert_equal!(
            DsnAction::from("x-custom"),
            DsnAction::Other("x-custom".to_string())
        );
        k9::assert_equal!(DsnAction::Other("x-custom".to_string()).to_string(), "x-custom");
    }

    #[test]
    fn json_line_layout() {
        let mut record = DsnRecord::new("a@b.com", DsnAction::Failed);
        record.final_rcpt = Some("a@b.com".to_string());
        record.status = Some("5.1.1".to_string());
        record.report_domain = Some("example.org".to_string());
        record.date = Some("20240101".to_string());

        let line = String::from_utf8(record.to_json_line().unwrap()).unwrap();
        k9::assert_equal!(
            line,
            "{\"orig_rcpt\":\"a@b.com\",\"final_rcpt\":\"a@b.com\",\"action\":\"failed\",\
             \"status\":\"5.1.1\",\"diag_code\":null,\"report_domain\":\"example.org\",\
             \"date\":\"20240101\"}\n"
        );
    }

    #[test]
    fn parse_sparse_line() {
        let record: DsnRecord = serde_json::from_str(
            r#"{"orig_rcpt":"a@b.com","date":"20240101","report_domain":"example.org"}"#,
        )
        .unwrap();
        k9::assert_equal!(record.orig_rcpt, "a@b.com");
        k9::assert_equal!(record.date.as_deref(), Some("20240101"));
        k9::assert_equal!(record.diag_code, None);
        k9::assert_equal!(record.action, DsnAction::Failed);
    }

    #[test]
    fn reason_names() {
        k9::assert_equal!(
            SaveReason::NoReportDomainInReferencesHeader.to_string(),
            "no_report_domain_in_references_header"
        );
        k9::assert_equal!(SaveReason::NoDsnDetails.to_string(), "no_dsn_details");
    }
}
