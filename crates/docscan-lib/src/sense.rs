//! Status translation: raw SCSI sense data to semantic outcomes.
//!
//! Each device family has a static rule table. Rules are matched in order;
//! the first rule whose sense key, ASC, ASCQ and flag requirements all match
//! decides the outcome. Anything no rule covers is an I/O error.
//!
//! Rules tagged with a soft class (`Adf`, `Fsu`) describe conditions that a
//! lenient policy treats as `Good`: an operator who has not asked to be told
//! about feeder problems will simply see the scan continue or stop short.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{SENSE_LEN, SenseData};

// ── Outcome ──

/// Semantic result of a device command, after sense translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    Good,
    /// Transient; retried inside the transport and never surfaced unless the
    /// retry budget runs out.
    Busy,
    NoMedium,
    Jammed,
    CoverOpen,
    /// No bar/patch code was found. A valid empty result, not a failure.
    CodeNotFound,
    Cancelled,
    /// Device signalled end of medium for the current transfer.
    EndOfData,
    OutOfMemory,
    IoError(String),
    InvalidRequest(String),
}

impl DeviceOutcome {
    pub fn is_good(&self) -> bool {
        matches!(self, DeviceOutcome::Good)
    }

    /// Outcomes that end a batch when returned from `read`.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            DeviceOutcome::Good
                | DeviceOutcome::Busy
                | DeviceOutcome::CodeNotFound
                | DeviceOutcome::EndOfData
        )
    }
}

impl fmt::Display for DeviceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceOutcome::Good => write!(f, "Success"),
            DeviceOutcome::Busy => write!(f, "Device busy"),
            DeviceOutcome::NoMedium => write!(f, "Document feeder out of documents"),
            DeviceOutcome::Jammed => write!(f, "Document feeder jammed"),
            DeviceOutcome::CoverOpen => write!(f, "Scanner cover is open"),
            DeviceOutcome::CodeNotFound => write!(f, "No bar/patch code found"),
            DeviceOutcome::Cancelled => write!(f, "Operation was cancelled"),
            DeviceOutcome::EndOfData => write!(f, "End of data"),
            DeviceOutcome::OutOfMemory => write!(f, "Out of memory"),
            DeviceOutcome::IoError(e) => write!(f, "Error during device I/O: {e}"),
            DeviceOutcome::InvalidRequest(e) => write!(f, "Invalid argument: {e}"),
        }
    }
}

impl std::error::Error for DeviceOutcome {}

// ── Rule tables ──

/// Sense table family, chosen once per attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SenseFamily {
    /// Bell+Howell Copiscan II series.
    BellHowell,
    /// Panasonic KV-SS series.
    Matsushita,
    /// Sharp JX-610: keyed on ASC only.
    SharpJx610,
    /// Sharp JX-250 / 320 / 330 / 350.
    SharpJx250,
}

impl fmt::Display for SenseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SenseFamily::BellHowell => "bell-howell",
            SenseFamily::Matsushita => "matsushita",
            SenseFamily::SharpJx610 => "sharp-jx610",
            SenseFamily::SharpJx250 => "sharp-jx250",
        };
        f.write_str(name)
    }
}

/// Outcome kind stored in a rule; payload-free so tables can be `static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Good,
    Busy,
    NoMedium,
    Jammed,
    CoverOpen,
    CodeNotFound,
    EndOfData,
    OutOfMemory,
    IoError,
    Invalid,
}

/// Conditions an operator can opt out of hearing about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftClass {
    /// Automatic document feeder.
    Adf,
    /// Film scanning unit.
    Fsu,
}

#[derive(Debug, Clone, Copy)]
pub struct SenseRule {
    pub key: u8,
    /// `None` matches any ASC; `Some` requires an exact match.
    pub asc: Option<u8>,
    pub ascq: Option<u8>,
    pub require_eom: bool,
    pub require_ili: bool,
    pub outcome: RuleOutcome,
    pub soft: Option<SoftClass>,
    pub note: &'static str,
}

/// Exact key/ASC/ASCQ rule.
const fn exact(key: u8, asc: u8, ascq: u8, outcome: RuleOutcome, note: &'static str) -> SenseRule {
    SenseRule {
        key,
        asc: Some(asc),
        ascq: Some(ascq),
        require_eom: false,
        require_ili: false,
        outcome,
        soft: None,
        note,
    }
}

/// Key + ASC rule (any qualifier).
const fn by_asc(key: u8, asc: u8, outcome: RuleOutcome, note: &'static str) -> SenseRule {
    SenseRule {
        key,
        asc: Some(asc),
        ascq: None,
        require_eom: false,
        require_ili: false,
        outcome,
        soft: None,
        note,
    }
}

/// Key-only fallback rule.
const fn by_key(key: u8, outcome: RuleOutcome, note: &'static str) -> SenseRule {
    SenseRule {
        key,
        asc: None,
        ascq: None,
        require_eom: false,
        require_ili: false,
        outcome,
        soft: None,
        note,
    }
}

const fn soft(mut rule: SenseRule, class: SoftClass) -> SenseRule {
    rule.soft = Some(class);
    rule
}

const fn with_eom(mut rule: SenseRule) -> SenseRule {
    rule.require_eom = true;
    rule
}

const fn with_ili(mut rule: SenseRule) -> SenseRule {
    rule.require_ili = true;
    rule
}

use RuleOutcome as R;

static BELL_HOWELL_RULES: &[SenseRule] = &[
    with_ili(exact(0x00, 0x00, 0x05, R::Good, "short read, residue in information field")),
    with_eom(by_key(0x00, R::NoMedium, "out of paper in the hopper")),
    by_key(0x00, R::Good, "no sense"),
    by_key(0x01, R::Good, "recovered error"),
    exact(0x02, 0x40, 0x01, R::Invalid, "P.O.D. error: scanner not found"),
    exact(0x02, 0x40, 0x02, R::Busy, "P.O.D. error: paper in transport"),
    exact(0x02, 0x40, 0x03, R::Invalid, "P.O.D. error: unknown scanner"),
    by_key(0x02, R::Busy, "not ready"),
    exact(0x03, 0x00, 0x00, R::Jammed, "paper jam detected"),
    by_key(0x03, R::IoError, "medium error"),
    exact(0x04, 0x60, 0x00, R::IoError, "illumination lamps failure"),
    exact(0x04, 0x80, 0x08, R::NoMedium, "operator pressed the stop key"),
    by_key(0x04, R::IoError, "hardware error"),
    exact(0x05, 0x2C, 0x02, R::Invalid, "batch start error"),
    exact(0x05, 0x2C, 0x03, R::Invalid, "batch abort error"),
    by_key(0x05, R::Invalid, "illegal request"),
    exact(0x06, 0x04, 0x01, R::Busy, "reset detected, unit becoming ready"),
    by_key(0x06, R::IoError, "unit attention"),
    exact(0x0B, 0x08, 0x01, R::NoMedium, "paper time-out on scan command"),
    exact(0x0B, 0x80, 0x01, R::Invalid, "section read out of border"),
    exact(0x0B, 0x80, 0x02, R::CodeNotFound, "no bar/patch code found"),
    exact(0x0B, 0x80, 0x03, R::Invalid, "icon read out of border"),
    by_key(0x0B, R::IoError, "aborted command"),
];

static MATSUSHITA_RULES: &[SenseRule] = &[
    with_eom(exact(0x00, 0x00, 0x00, R::EndOfData, "end of page")),
    by_key(0x00, R::Good, "no sense"),
    exact(0x02, 0x04, 0x81, R::CoverOpen, "jam door open"),
    by_asc(0x03, 0x3A, R::NoMedium, "no paper in the feeder"),
    by_asc(0x03, 0x80, R::Jammed, "paper jam"),
    by_asc(0x05, 0x20, R::IoError, "invalid command"),
    by_asc(0x05, 0x24, R::IoError, "invalid field in CDB"),
    by_asc(0x05, 0x26, R::IoError, "invalid field in parameter list"),
    exact(0x05, 0x2C, 0x80, R::OutOfMemory, "not enough memory for the scan area"),
    by_asc(0x06, 0x29, R::Good, "reset occurred"),
];

// The JX-610 reports the condition in ASC alone, whatever the sense key.
// Only the informational codes need rules; everything else is an I/O error.
static SHARP_JX610_ASC_RULES: &[(u8, RuleOutcome, &str)] = &[
    (0x04, R::IoError, "scanner not ready"),
    (0x08, R::IoError, "communication failure"),
    (0x29, R::Good, "reset occurred"),
    (0x2A, R::Good, "mode parameter changed"),
    (0x37, R::Good, "rounded parameter"),
    (0x60, R::IoError, "lamp failure"),
    (0x62, R::IoError, "scan head positioning error"),
];

static SHARP_JX250_RULES: &[SenseRule] = &[
    soft(exact(0x02, 0x80, 0x00, R::CoverOpen, "ADF cover open"), SoftClass::Adf),
    soft(exact(0x02, 0x80, 0x01, R::CoverOpen, "ADF maintenance cover open"), SoftClass::Adf),
    soft(exact(0x02, 0x81, 0x00, R::CoverOpen, "FSU cover open"), SoftClass::Fsu),
    soft(exact(0x02, 0x81, 0x01, R::IoError, "FSU light dispersion error"), SoftClass::Fsu),
    soft(by_asc(0x03, 0x3A, R::NoMedium, "ADF is empty"), SoftClass::Adf),
    soft(by_asc(0x03, 0x53, R::Jammed, "ADF paper jam"), SoftClass::Adf),
    by_key(0x04, R::IoError, "hardware error"),
    by_key(0x05, R::IoError, "illegal request"),
    by_asc(0x06, 0x29, R::Good, "reset occurred"),
    by_key(0x06, R::IoError, "unit attention"),
    by_key(0x09, R::IoError, "data remains"),
];

/// Which soft conditions the operator wants reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplainPolicy {
    pub adf: bool,
    pub fsu: bool,
}

impl Default for ComplainPolicy {
    fn default() -> Self {
        ComplainPolicy {
            adf: true,
            fsu: true,
        }
    }
}

impl ComplainPolicy {
    /// Lenient: soft conditions read as `Good`.
    pub fn lenient() -> Self {
        ComplainPolicy {
            adf: false,
            fsu: false,
        }
    }

    fn complains(&self, class: SoftClass) -> bool {
        match class {
            SoftClass::Adf => self.adf,
            SoftClass::Fsu => self.fsu,
        }
    }
}

/// Result of translating one sense block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub outcome: DeviceOutcome,
    /// Bytes the device did not transfer, when it reported a residue.
    pub residue: Option<u32>,
}

impl Translation {
    fn io_error(detail: impl Into<String>) -> Self {
        Translation {
            outcome: DeviceOutcome::IoError(detail.into()),
            residue: None,
        }
    }
}

/// Format a sense block as space-separated hex, as logged on every translation.
pub fn hex_dump(raw: &[u8]) -> String {
    raw.iter()
        .take(SENSE_LEN)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Translate a raw sense block. Pure in `(raw, family, policy)`.
pub fn translate(raw: &[u8], family: SenseFamily, policy: ComplainPolicy) -> Translation {
    log::trace!("sense [{family}]: {}", hex_dump(raw));

    let Some(sense) = SenseData::parse(raw) else {
        return Translation::io_error("sense block too short");
    };

    match family {
        SenseFamily::BellHowell => {
            if sense.response_code != 0x70 && sense.response_code != 0x71 {
                return Translation::io_error(format!(
                    "invalid sense response code 0x{:02x}",
                    sense.response_code
                ));
            }
        }
        SenseFamily::Matsushita => {
            if sense.response_code != 0x70 {
                return Translation::io_error(format!(
                    "invalid sense response code 0x{:02x}",
                    sense.response_code
                ));
            }
            if sense.reported_len() < 14 || sense.asc.is_none() {
                return Translation::io_error("sense too short, no ASC/ASCQ");
            }
        }
        SenseFamily::SharpJx610 | SenseFamily::SharpJx250 => {
            if sense.additional_len < 5 || sense.asc.is_none() {
                return Translation::io_error("sense carries no additional information");
            }
        }
    }

    let residue = if sense.ili { sense.residue() } else { None };

    let matched = match family {
        SenseFamily::BellHowell => find_rule(BELL_HOWELL_RULES, &sense),
        SenseFamily::Matsushita => find_rule(MATSUSHITA_RULES, &sense),
        SenseFamily::SharpJx250 => find_rule(SHARP_JX250_RULES, &sense),
        SenseFamily::SharpJx610 => find_jx610(&sense),
    };

    let Some((kind, soft_class, note)) = matched else {
        log::debug!(
            "sense [{family}]: unmapped key={:x} asc={:02x?} ascq={:02x?}",
            sense.key,
            sense.asc,
            sense.ascq
        );
        return Translation::io_error(format!(
            "unhandled sense key 0x{:x}, asc {}, ascq {}",
            sense.key,
            fmt_opt(sense.asc),
            fmt_opt(sense.ascq)
        ));
    };

    if let Some(class) = soft_class
        && !policy.complains(class)
    {
        log::debug!("sense [{family}]: {note} (ignored by policy)");
        return Translation {
            outcome: DeviceOutcome::Good,
            residue,
        };
    }

    log::debug!("sense [{family}]: {note} -> {kind:?}");
    let detail = || {
        format!(
            "{note} (key 0x{:x}, asc {}, ascq {})",
            sense.key,
            fmt_opt(sense.asc),
            fmt_opt(sense.ascq)
        )
    };
    let outcome = match kind {
        R::Good => DeviceOutcome::Good,
        R::Busy => DeviceOutcome::Busy,
        R::NoMedium => DeviceOutcome::NoMedium,
        R::Jammed => DeviceOutcome::Jammed,
        R::CoverOpen => DeviceOutcome::CoverOpen,
        R::CodeNotFound => DeviceOutcome::CodeNotFound,
        R::EndOfData => DeviceOutcome::EndOfData,
        R::OutOfMemory => DeviceOutcome::OutOfMemory,
        R::IoError => DeviceOutcome::IoError(detail()),
        R::Invalid => DeviceOutcome::InvalidRequest(detail()),
    };
    Translation { outcome, residue }
}

fn fmt_opt(v: Option<u8>) -> String {
    match v {
        Some(b) => format!("0x{b:02x}"),
        None => "-".into(),
    }
}

fn find_rule(
    table: &'static [SenseRule],
    sense: &SenseData,
) -> Option<(RuleOutcome, Option<SoftClass>, &'static str)> {
    table
        .iter()
        .find(|r| {
            r.key == sense.key
                && r.asc.is_none_or(|a| sense.asc == Some(a))
                && r.ascq.is_none_or(|q| sense.ascq == Some(q))
                && (!r.require_eom || sense.eom)
                && (!r.require_ili || sense.ili)
        })
        .map(|r| (r.outcome, r.soft, r.note))
}

fn find_jx610(sense: &SenseData) -> Option<(RuleOutcome, Option<SoftClass>, &'static str)> {
    let asc = sense.asc?;
    SHARP_JX610_ASC_RULES
        .iter()
        .find(|(code, _, _)| *code == asc)
        .map(|&(_, outcome, note)| (outcome, None, note))
}

/// Every `(key, asc, ascq)` triple named by a family's table, for exhaustive checks.
pub fn table_triples(family: SenseFamily) -> Vec<(u8, u8, u8)> {
    let rules: &[SenseRule] = match family {
        SenseFamily::BellHowell => BELL_HOWELL_RULES,
        SenseFamily::Matsushita => MATSUSHITA_RULES,
        SenseFamily::SharpJx250 => SHARP_JX250_RULES,
        SenseFamily::SharpJx610 => {
            return SHARP_JX610_ASC_RULES
                .iter()
                .flat_map(|&(asc, _, _)| (0..16u8).map(move |k| (k, asc, 0)))
                .collect();
        }
    };
    rules
        .iter()
        .map(|r| (r.key, r.asc.unwrap_or(0), r.ascq.unwrap_or(0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_sense, build_short_read_sense};

    fn t(family: SenseFamily, key: u8, asc: u8, ascq: u8) -> DeviceOutcome {
        translate(&build_sense(key, asc, ascq), family, ComplainPolicy::default()).outcome
    }

    fn with_flags(key: u8, asc: u8, ascq: u8, flags: u8) -> Vec<u8> {
        let mut raw = build_sense(key, asc, ascq);
        raw[2] |= flags;
        raw
    }

    // ── Bell+Howell ──

    #[test]
    fn bh_short_read_reports_residue() {
        let tr = translate(
            &build_short_read_sense(500),
            SenseFamily::BellHowell,
            ComplainPolicy::default(),
        );
        assert_eq!(tr.outcome, DeviceOutcome::Good);
        assert_eq!(tr.residue, Some(500));
    }

    #[test]
    fn bh_eom_is_no_medium() {
        let raw = with_flags(0x00, 0x00, 0x02, 0x40);
        let tr = translate(&raw, SenseFamily::BellHowell, ComplainPolicy::default());
        assert_eq!(tr.outcome, DeviceOutcome::NoMedium);
    }

    #[test]
    fn bh_key_table() {
        use SenseFamily::BellHowell as B;
        assert_eq!(t(B, 0x01, 0x00, 0x00), DeviceOutcome::Good);
        assert_eq!(t(B, 0x02, 0x00, 0x00), DeviceOutcome::Busy);
        assert_eq!(t(B, 0x02, 0x40, 0x02), DeviceOutcome::Busy);
        assert!(matches!(
            t(B, 0x02, 0x40, 0x01),
            DeviceOutcome::InvalidRequest(_)
        ));
        assert_eq!(t(B, 0x03, 0x00, 0x00), DeviceOutcome::Jammed);
        assert!(matches!(t(B, 0x03, 0x01, 0x00), DeviceOutcome::IoError(_)));
        assert_eq!(t(B, 0x04, 0x80, 0x08), DeviceOutcome::NoMedium);
        assert!(matches!(t(B, 0x04, 0x80, 0x12), DeviceOutcome::IoError(_)));
        assert!(matches!(
            t(B, 0x05, 0x24, 0x00),
            DeviceOutcome::InvalidRequest(_)
        ));
        assert_eq!(t(B, 0x06, 0x04, 0x01), DeviceOutcome::Busy);
        assert!(matches!(t(B, 0x06, 0x29, 0x00), DeviceOutcome::IoError(_)));
        assert_eq!(t(B, 0x0B, 0x08, 0x01), DeviceOutcome::NoMedium);
        assert_eq!(t(B, 0x0B, 0x80, 0x02), DeviceOutcome::CodeNotFound);
        assert!(matches!(t(B, 0x0B, 0x47, 0x00), DeviceOutcome::IoError(_)));
        assert!(matches!(t(B, 0x0D, 0x00, 0x00), DeviceOutcome::IoError(_)));
    }

    #[test]
    fn bh_rejects_bad_response_code() {
        let mut raw = build_sense(0x00, 0, 0);
        raw[0] = 0x72;
        let tr = translate(&raw, SenseFamily::BellHowell, ComplainPolicy::default());
        assert!(matches!(tr.outcome, DeviceOutcome::IoError(_)));

        raw[0] = 0x71;
        let tr = translate(&raw, SenseFamily::BellHowell, ComplainPolicy::default());
        assert_eq!(tr.outcome, DeviceOutcome::Good);
    }

    // ── Matsushita ──

    #[test]
    fn matsushita_table() {
        use SenseFamily::Matsushita as M;
        assert_eq!(t(M, 0x00, 0x00, 0x00), DeviceOutcome::Good);
        assert_eq!(t(M, 0x02, 0x04, 0x81), DeviceOutcome::CoverOpen);
        assert_eq!(t(M, 0x03, 0x3A, 0x00), DeviceOutcome::NoMedium);
        assert_eq!(t(M, 0x03, 0x80, 0x13), DeviceOutcome::Jammed);
        assert!(matches!(t(M, 0x05, 0x26, 0x00), DeviceOutcome::IoError(_)));
        assert_eq!(t(M, 0x05, 0x2C, 0x80), DeviceOutcome::OutOfMemory);
        assert_eq!(t(M, 0x06, 0x29, 0x02), DeviceOutcome::Good);
        assert!(matches!(t(M, 0x02, 0x04, 0x01), DeviceOutcome::IoError(_)));
    }

    #[test]
    fn matsushita_eom_is_end_of_data() {
        let raw = with_flags(0x00, 0x00, 0x00, 0x40);
        let tr = translate(&raw, SenseFamily::Matsushita, ComplainPolicy::default());
        assert_eq!(tr.outcome, DeviceOutcome::EndOfData);
    }

    #[test]
    fn matsushita_requires_full_sense() {
        let mut raw = build_sense(0x03, 0x3A, 0x00);
        raw[7] = 5; // claims 12 bytes
        let tr = translate(&raw, SenseFamily::Matsushita, ComplainPolicy::default());
        assert!(matches!(tr.outcome, DeviceOutcome::IoError(_)));

        let mut raw = build_sense(0x03, 0x3A, 0x00);
        raw[0] = 0x71;
        let tr = translate(&raw, SenseFamily::Matsushita, ComplainPolicy::default());
        assert!(matches!(tr.outcome, DeviceOutcome::IoError(_)));
    }

    // ── Sharp ──

    #[test]
    fn jx610_keys_on_asc_only() {
        use SenseFamily::SharpJx610 as S;
        assert_eq!(t(S, 0x06, 0x29, 0x00), DeviceOutcome::Good);
        assert_eq!(t(S, 0x02, 0x29, 0x00), DeviceOutcome::Good);
        assert_eq!(t(S, 0x00, 0x37, 0x00), DeviceOutcome::Good);
        assert!(matches!(t(S, 0x04, 0x60, 0x00), DeviceOutcome::IoError(_)));
        assert!(matches!(t(S, 0x05, 0x99, 0x00), DeviceOutcome::IoError(_)));
    }

    #[test]
    fn jx250_strict_policy() {
        use SenseFamily::SharpJx250 as S;
        assert_eq!(t(S, 0x02, 0x80, 0x00), DeviceOutcome::CoverOpen);
        assert_eq!(t(S, 0x02, 0x81, 0x00), DeviceOutcome::CoverOpen);
        assert!(matches!(t(S, 0x02, 0x81, 0x01), DeviceOutcome::IoError(_)));
        assert!(matches!(t(S, 0x02, 0x80, 0x07), DeviceOutcome::IoError(_)));
        assert_eq!(t(S, 0x03, 0x3A, 0x00), DeviceOutcome::NoMedium);
        assert_eq!(t(S, 0x03, 0x53, 0x00), DeviceOutcome::Jammed);
        assert_eq!(t(S, 0x06, 0x29, 0x00), DeviceOutcome::Good);
        assert!(matches!(t(S, 0x06, 0x2A, 0x00), DeviceOutcome::IoError(_)));
        assert!(matches!(t(S, 0x09, 0x00, 0x00), DeviceOutcome::IoError(_)));
    }

    #[test]
    fn jx250_lenient_policy_downgrades_soft_rules() {
        let lenient = ComplainPolicy::lenient();
        for (key, asc, ascq) in [(0x02, 0x80, 0x00), (0x02, 0x81, 0x01), (0x03, 0x53, 0x00)] {
            let tr = translate(
                &build_sense(key, asc, ascq),
                SenseFamily::SharpJx250,
                lenient,
            );
            assert_eq!(tr.outcome, DeviceOutcome::Good, "{key:x}/{asc:x}/{ascq:x}");
        }
        // Hard errors stay hard.
        let tr = translate(&build_sense(0x04, 0x60, 0), SenseFamily::SharpJx250, lenient);
        assert!(matches!(tr.outcome, DeviceOutcome::IoError(_)));
    }

    #[test]
    fn jx250_adf_only_policy() {
        let policy = ComplainPolicy {
            adf: true,
            fsu: false,
        };
        let adf = translate(&build_sense(0x03, 0x3A, 0), SenseFamily::SharpJx250, policy);
        assert_eq!(adf.outcome, DeviceOutcome::NoMedium);
        let fsu = translate(&build_sense(0x02, 0x81, 0), SenseFamily::SharpJx250, policy);
        assert_eq!(fsu.outcome, DeviceOutcome::Good);
    }

    #[test]
    fn sharp_requires_additional_length() {
        let mut raw = build_sense(0x03, 0x3A, 0x00);
        raw[7] = 4;
        let tr = translate(&raw, SenseFamily::SharpJx250, ComplainPolicy::default());
        assert!(matches!(tr.outcome, DeviceOutcome::IoError(_)));
    }

    // ── General ──

    #[test]
    fn empty_sense_is_io_error() {
        for family in [
            SenseFamily::BellHowell,
            SenseFamily::Matsushita,
            SenseFamily::SharpJx610,
            SenseFamily::SharpJx250,
        ] {
            let tr = translate(&[], family, ComplainPolicy::default());
            assert!(matches!(tr.outcome, DeviceOutcome::IoError(_)));
        }
    }

    #[test]
    fn translation_is_deterministic_over_every_table_entry() {
        for family in [
            SenseFamily::BellHowell,
            SenseFamily::Matsushita,
            SenseFamily::SharpJx610,
            SenseFamily::SharpJx250,
        ] {
            for policy in [ComplainPolicy::default(), ComplainPolicy::lenient()] {
                for (key, asc, ascq) in table_triples(family) {
                    for flags in [0x00, 0x20, 0x40] {
                        let raw = with_flags(key, asc, ascq, flags);
                        let a = translate(&raw, family, policy);
                        let b = translate(&raw, family, policy);
                        assert_eq!(a, b, "{family} {key:x}/{asc:x}/{ascq:x} flags {flags:x}");
                    }
                }
            }
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(!DeviceOutcome::Good.is_terminal());
        assert!(!DeviceOutcome::CodeNotFound.is_terminal());
        assert!(DeviceOutcome::Jammed.is_terminal());
        assert!(DeviceOutcome::Cancelled.is_terminal());
        assert!(DeviceOutcome::IoError("x".into()).is_terminal());
    }

    #[test]
    fn display_outcomes() {
        assert_eq!(DeviceOutcome::Jammed.to_string(), "Document feeder jammed");
        assert_eq!(
            DeviceOutcome::IoError("timeout".into()).to_string(),
            "Error during device I/O: timeout"
        );
        assert_eq!(SenseFamily::SharpJx250.to_string(), "sharp-jx250");
    }
}
