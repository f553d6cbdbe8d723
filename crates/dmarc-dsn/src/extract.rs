//! Classifies a bounce message and pulls out the DMARC report domain and
//! the recipient that the report was sent to.
//!
//! Three strategies are attempted, in order:
//!
//! 1. When the envelope carried an address extension, the extension names
//!    the report recipient and the report domain is found anywhere in the
//!    raw message text.
//! 2. RFC 3464 `message/delivery-status` parts, with the report domain
//!    recovered from the `Subject` of the returned original message.
//! 3. Google Groups bounces, which are not DSNs at all but carry enough
//!    in their `References` and `X-Failed-Recipients` headers.
use crate::record::{DsnAction, DsnRecord, SaveReason};
use crate::validate::{is_valid_domain, is_valid_email};
use chrono::Local;
use mailparse::{parse_headers, parse_mail, MailHeader, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const GOOGLE_GROUPS_MAILER_DAEMON: &str =
    "Mail Delivery Subsystem <mailer-daemon@googlemail.com>";

/// Stands in for the `@` of the report recipient encoded in the
/// envelope extension, eg: `dmarc=example.org`
pub const EXTENSION_PLACEHOLDER: char = '=';

static CONTINUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n\s+").expect("continuation regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("blank lines regex"));
static REPORT_DOMAIN_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*Report Domain:\s").expect("report domain prefix regex"));
static SUBMITTER_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\sSubmitter:\s.*$").expect("submitter suffix regex"));
static REPORT_DOMAIN_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Report Domain:\s+(\S+)\s+Submitter:").expect("report domain line regex")
});
static ADDRESS_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^rfc822;\s*").expect("address type regex"));
static REFERENCES_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([^<>\s]+)-\d+@[^<>\s]+>$").expect("references domain regex")
});

/// Everything an extraction run needs to know about its invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    /// Opaque identifier used to name saved messages
    pub queue_id: String,
    /// Envelope address extension; never holds an empty string
    pub extension: Option<String>,
    /// Processing date, `YYYYMMDD`
    pub date: String,
}

impl ProcessContext {
    pub fn new(queue_id: impl Into<String>, extension: Option<String>) -> Self {
        Self {
            queue_id: queue_id.into(),
            extension: extension.filter(|ext| !ext.is_empty()),
            date: Local::now().format("%Y%m%d").to_string(),
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }
}

/// The result of classifying a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// At least one bounce record was recovered
    Records(Vec<DsnRecord>),
    /// A delayed-delivery notice; it is not a final bounce and must
    /// leave no trace at all
    Delayed,
    /// The message should be set aside for manual inspection
    Unclassified(SaveReason),
}

/// Short-circuits extraction from deep within a strategy
#[derive(Debug)]
enum Stop {
    Delayed,
    Save(SaveReason),
}

impl From<SaveReason> for Stop {
    fn from(reason: SaveReason) -> Stop {
        Stop::Save(reason)
    }
}

pub fn extract(ctx: &ProcessContext, raw: &[u8]) -> Outcome {
    match extract_records(ctx, raw) {
        Ok(records) if records.is_empty() => {
            tracing::debug!("no dsn details found in {}", ctx.queue_id);
            Outcome::Unclassified(SaveReason::NoDsnDetails)
        }
        Ok(records) => Outcome::Records(records),
        Err(Stop::Delayed) => Outcome::Delayed,
        Err(Stop::Save(reason)) => Outcome::Unclassified(reason),
    }
}

fn extract_records(ctx: &ProcessContext, raw: &[u8]) -> Result<Vec<DsnRecord>, Stop> {
    if let Some(extension) = ctx.extension.as_deref() {
        return Ok(vec![from_extension(ctx, extension, raw)?]);
    }

    let mail = match parse_mail(raw) {
        Ok(mail) => mail,
        Err(err) => {
            tracing::error!("{}: unable to parse message: {err:#}", ctx.queue_id);
            return Ok(vec![]);
        }
    };

    let records = from_delivery_status(ctx, &mail)?;
    if !records.is_empty() {
        return Ok(records);
    }

    Ok(from_google_groups(ctx, &mail)?.into_iter().collect())
}

/// Recover the report recipient from the envelope extension and the report
/// domain from the original subject quoted somewhere in the message text.
fn from_extension(ctx: &ProcessContext, extension: &str, raw: &[u8]) -> Result<DsnRecord, Stop> {
    let rcpt = match extension.rsplit_once(EXTENSION_PLACEHOLDER) {
        Some((local, domain)) => format!("{local}@{domain}"),
        None => extension.to_string(),
    };
    if !is_valid_email(&rcpt) {
        tracing::error!("extension '{extension}' does not encode a valid address: '{rcpt}'");
        return Err(SaveReason::NoReportRcptInExtension.into());
    }
    tracing::debug!("rcpt from extension: {rcpt}");

    let text = String::from_utf8_lossy(raw);
    let report_domain = REPORT_DOMAIN_LINE_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|domain| is_valid_domain(domain))
        .ok_or_else(|| {
            tracing::error!("no usable 'Report Domain:' found in message");
            Stop::Save(SaveReason::NoReportDomainInMessage)
        })?;
    tracing::debug!("report_domain from message: {report_domain}");

    let mut record = DsnRecord::new(rcpt.clone(), DsnAction::AnyReason);
    record.final_rcpt = Some(rcpt);
    record.report_domain = Some(report_domain);
    record.date = Some(ctx.date.clone());
    Ok(record)
}

fn walk<'a, 'b>(part: &'b ParsedMail<'a>, parts: &mut Vec<&'b ParsedMail<'a>>) {
    parts.push(part);
    for sub in &part.subparts {
        walk(sub, parts);
    }
}

fn from_delivery_status(ctx: &ProcessContext, mail: &ParsedMail) -> Result<Vec<DsnRecord>, Stop> {
    let mut parts = vec![];
    walk(mail, &mut parts);

    let mut records = vec![];
    let mut orig_subject = None;

    for part in parts {
        match part.ctype.mimetype.as_str() {
            "message/delivery-status" | "message/global-delivery-status" => {
                let body = match part.get_body() {
                    Ok(body) => body.replace("\r\n", "\n"),
                    Err(err) => {
                        tracing::debug!("skipping undecodable delivery-status part: {err:#}");
                        continue;
                    }
                };
                for block in BLANK_LINES_RE.split(body.trim()) {
                    if let Some(record) = per_recipient_record(block)? {
                        tracing::debug!("adding rcpt={}", record.orig_rcpt);
                        records.push(record);
                    }
                }
            }
            "message/rfc822" | "text/rfc822-headers" if orig_subject.is_none() => {
                orig_subject = original_subject(part);
                if let Some(subject) = &orig_subject {
                    tracing::debug!("orig_subject={subject}");
                }
            }
            _ => {}
        }
    }

    if records.is_empty() {
        return Ok(records);
    }

    let report_domain = match orig_subject {
        Some(subject) => Some(report_domain_from_subject(&subject)?),
        None => None,
    };

    for record in &mut records {
        if record.report_domain.is_none() {
            tracing::debug!(
                "rcpt={}, adding report_domain={report_domain:?}",
                record.orig_rcpt
            );
            record.report_domain = report_domain.clone();
        }
        record.date = Some(ctx.date.clone());
    }

    Ok(records)
}

/// Build a record from one per-recipient block of a delivery-status body.
/// Blocks without both `Action` and `Final-Recipient` (such as the
/// per-message block) yield `None`.
fn per_recipient_record(block: &str) -> Result<Option<DsnRecord>, Stop> {
    let fields = match extract_headers(block.as_bytes()) {
        Ok(fields) => fields,
        Err(err) => {
            tracing::debug!("skipping unparseable delivery-status block: {err:#}");
            return Ok(None);
        }
    };

    let (Some(action), Some(final_rcpt)) = (
        first_field(&fields, "action"),
        first_field(&fields, "final-recipient"),
    ) else {
        return Ok(None);
    };

    let action = DsnAction::from(action);
    if action == DsnAction::Delayed {
        tracing::info!("action is delayed, this is not a final bounce");
        return Err(Stop::Delayed);
    }

    let final_rcpt = strip_address_type(final_rcpt);
    let orig_rcpt = first_field(&fields, "original-recipient")
        .map(strip_address_type)
        .unwrap_or_else(|| final_rcpt.clone());

    let mut record = DsnRecord::new(orig_rcpt, action);
    record.final_rcpt = Some(final_rcpt);
    record.diag_code = first_field(&fields, "diagnostic-code").map(collapse_continuations);
    record.status = first_field(&fields, "status").map(collapse_continuations);
    Ok(Some(record))
}

fn original_subject(part: &ParsedMail) -> Option<String> {
    let body = part.get_body_raw().ok()?;
    let (headers, _) = parse_headers(&body).ok()?;
    headers
        .get_first_header("Subject")
        .map(|subject| collapse_continuations(&raw_value(subject)))
}

/// Reduce a DMARC aggregate report subject such as
/// `Report Domain: example.org Submitter: google.com Report-ID: <...>`
/// to the bare report domain
fn report_domain_from_subject(subject: &str) -> Result<String, Stop> {
    let without_prefix = REPORT_DOMAIN_PREFIX_RE.replace(subject, "");
    let report_domain = SUBMITTER_SUFFIX_RE.replace(&without_prefix, "").into_owned();

    if report_domain == subject {
        tracing::error!("unexpected subject, probably not a dsn for a dmarc report: {subject}");
        return Err(SaveReason::NoSubjectReMatch.into());
    }

    if !is_valid_domain(&report_domain) {
        tracing::error!("subject did not yield a domain name: '{report_domain}'");
        return Err(SaveReason::NoSubjectDomainName.into());
    }

    Ok(report_domain)
}

/// Google Groups answers a report sent to a group it can't deliver to
/// with a plain message rather than a DSN.
fn from_google_groups(ctx: &ProcessContext, mail: &ParsedMail) -> Result<Option<DsnRecord>, Stop> {
    let headers = &mail.headers;
    let from = headers.get_first_value("From");
    if from.as_deref().map(str::trim) != Some(GOOGLE_GROUPS_MAILER_DAEMON) {
        return Ok(None);
    }

    let (Some(failed_rcpt), Some(references), Some(in_reply_to)) = (
        headers.get_first_value("X-Failed-Recipients"),
        headers.get_first_value("References"),
        headers.get_first_value("In-Reply-To"),
    ) else {
        tracing::debug!("google groups bounce lacks the headers we rely upon");
        return Ok(None);
    };

    let references = references.trim();
    if references != in_reply_to.trim() {
        tracing::debug!("References and In-Reply-To differ, not a google groups report bounce");
        return Ok(None);
    }

    let report_domain = REFERENCES_DOMAIN_RE
        .captures(references)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|domain| is_valid_domain(domain))
        .ok_or_else(|| {
            tracing::error!("no report domain in References: {references}");
            Stop::Save(SaveReason::NoReportDomainInReferencesHeader)
        })?;

    let failed_rcpt = failed_rcpt.trim().to_string();
    tracing::debug!("google groups bounce for {failed_rcpt}, report_domain={report_domain}");

    let mut record = DsnRecord::new(failed_rcpt.clone(), DsnAction::Failed);
    record.final_rcpt = Some(failed_rcpt);
    record.status = Some("5.1.1".to_string());
    record.report_domain = Some(report_domain);
    record.date = Some(ctx.date.clone());
    Ok(Some(record))
}

fn extract_headers(block: &[u8]) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let (headers, _) = parse_headers(block)?;
    let mut fields = BTreeMap::new();
    for hdr in headers {
        fields
            .entry(hdr.get_key_ref().to_ascii_lowercase())
            .or_insert_with(Vec::new)
            .push(raw_value(&hdr));
    }
    Ok(fields)
}

fn first_field<'a>(fields: &'a BTreeMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(|values| values.first())
        .map(|v| v.as_str())
}

fn strip_address_type(addr: &str) -> String {
    ADDRESS_TYPE_RE.replace(addr.trim(), "").trim().to_string()
}

/// The header value as it appears on the wire, folding included
fn raw_value(hdr: &MailHeader) -> String {
    String::from_utf8_lossy(hdr.get_value_raw()).into_owned()
}

fn collapse_continuations(value: &str) -> String {
    CONTINUATION_RE.replace_all(value.trim(), " ").into_owned()
}
