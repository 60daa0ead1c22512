//! Reference Extractor (C12).
//!
//! Ordered regex battery directly grounded on the distilled system's
//! `reference_extractor.py`: stycke > kap+§ > SFS-explicit > proposition >
//! SOU > Ds > betänkande > NJA > HFD > EU > implicit-SFS > bare §, with the
//! same suppression and dedup rules. Statics follow the teacher's
//! `LazyLock<Regex>` convention (`rag/citation_validator.rs`).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::LegalReference;

static STYCKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+[a-z]?)\s*kap\.?\s+(\d+[a-z]?)\s*§\s+(första|andra|tredje|fjärde|femte|sjätte|sjunde|åttonde|nionde|tionde)\s+stycket",
    )
    .expect("stycke regex is valid")
});
static SECTION_CHAPTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+[a-z]?)\s*kap\.?\s+(\d+[a-z]?)\s*§").expect("section+chapter regex is valid"));
static SFS_EXPLICIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SFS\s+(\d{4}:\d+)").expect("sfs explicit regex is valid"));
static SFS_IMPLICIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w])(\d{4}:\d{2,})\b").expect("sfs implicit regex is valid"));
static SECTION_SIMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w])(\d+[a-z]?)\s*§").expect("section simple regex is valid"));
static PROPOSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)prop\.\s*(\d{4}/\d{2}:\d+)").expect("proposition regex is valid"));
static SOU_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SOU\s+(\d{4}:\d+)").expect("sou regex is valid"));
static DS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Ds\s+(\d{4}:\d+)").expect("ds regex is valid"));
static BETANKANDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bet\.\s*(\d{4}/\d{2}:[A-ZÅÄÖ]+\d+)").expect("betankande regex is valid")
});
static NJA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"NJA\s+(\d{4})\s+s\.\s*(\d+)").expect("nja regex is valid"));
static HFD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HFD\s+(\d{4})\s+ref\.\s*(\d+)").expect("hfd regex is valid"));
static EU_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(förordning|direktiv)\s*(?:\((?:EU|EG|EEG)\)\s*)?(\d{4}/\d+(?:/[A-Z]{2,3})?)")
        .expect("eu directive regex is valid")
});

/// Applies the ordered regex battery to `text` and returns deduplicated
/// references in the spec's priority order. Idempotent (§8 P8): running
/// this twice on the same text yields an identical multiset because the
/// dedup key is purely a function of `(ref_type, raw_match)`.
pub fn extract_references(text: &str) -> Vec<LegalReference> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut refs = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut suppress_section_keys: HashSet<String> = HashSet::new();

    fn add(seen: &mut HashSet<String>, refs: &mut Vec<LegalReference>, r: LegalReference) {
        let key = format!("{}:{}", r.ref_type(), r.raw_match());
        if seen.insert(key) {
            refs.push(r);
        }
    }

    // 1. Stycke references (must precede kap+§ to claim the overlapping span).
    for cap in STYCKE_RE.captures_iter(text) {
        let kap = &cap[1];
        let par = &cap[2];
        let ordinal = cap[3].to_lowercase();
        let raw = cap[0].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Section {
                raw_match: raw,
                target_chapter: Some(kap.to_string()),
                target_section: Some(par.to_string()),
                display: format!("{} kap. {} § {} stycket", kap, par, ordinal),
            },
        );
        suppress_section_keys.insert(format!("{} kap. {} §", kap, par));
    }

    // 2. Section + chapter references: "2 kap. 3 §".
    for cap in SECTION_CHAPTER_RE.captures_iter(text) {
        let kap = &cap[1];
        let par = &cap[2];
        let dedup_key = format!("{} kap. {} §", kap, par);
        if suppress_section_keys.contains(&dedup_key) {
            continue;
        }
        add(
            &mut seen,
            &mut refs,
            LegalReference::Section {
                raw_match: cap[0].to_string(),
                target_chapter: Some(kap.to_string()),
                target_section: Some(par.to_string()),
                display: dedup_key,
            },
        );
    }

    // 3. Explicit SFS references: "SFS 2009:400".
    for cap in SFS_EXPLICIT_RE.captures_iter(text) {
        let sfs_nr = cap[1].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Sfs {
                raw_match: cap[0].to_string(),
                target_sfs: Some(sfs_nr.clone()),
                display: format!("SFS {}", sfs_nr),
            },
        );
    }

    // 4. Proposition references.
    for cap in PROPOSITION_RE.captures_iter(text) {
        let prop_nr = cap[1].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Proposition {
                raw_match: cap[0].to_string(),
                display: format!("prop. {}", prop_nr),
            },
        );
    }

    // 5. SOU references.
    for cap in SOU_RE.captures_iter(text) {
        let sou_nr = cap[1].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Sou {
                raw_match: cap[0].to_string(),
                display: format!("SOU {}", sou_nr),
            },
        );
    }

    // 6. Ds references.
    for cap in DS_RE.captures_iter(text) {
        let ds_nr = cap[1].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Ds {
                raw_match: cap[0].to_string(),
                display: format!("Ds {}", ds_nr),
            },
        );
    }

    // 7. Betänkande references.
    for cap in BETANKANDE_RE.captures_iter(text) {
        let bet_nr = cap[1].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Betankande {
                raw_match: cap[0].to_string(),
                display: format!("bet. {}", bet_nr),
            },
        );
    }

    // 8. NJA references.
    for cap in NJA_RE.captures_iter(text) {
        let (year, page) = (&cap[1], &cap[2]);
        add(
            &mut seen,
            &mut refs,
            LegalReference::Nja {
                raw_match: cap[0].to_string(),
                display: format!("NJA {} s. {}", year, page),
            },
        );
    }

    // 9. HFD references.
    for cap in HFD_RE.captures_iter(text) {
        let (year, ref_num) = (&cap[1], &cap[2]);
        add(
            &mut seen,
            &mut refs,
            LegalReference::Hfd {
                raw_match: cap[0].to_string(),
                display: format!("HFD {} ref. {}", year, ref_num),
            },
        );
    }

    // 10. EU directive/regulation references.
    for cap in EU_DIRECTIVE_RE.captures_iter(text) {
        let doc_type = cap[1].to_lowercase();
        let eu_nr = cap[2].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Eu {
                raw_match: cap[0].to_string(),
                display: format!("{} {}", doc_type, eu_nr),
            },
        );
    }

    // 11. Implicit SFS references: "1974:152" not already captured explicitly
    // anywhere in the text (by number, regardless of adjacency) and not
    // immediately preceded by "SFS" (which the explicit pattern owns).
    for cap in SFS_IMPLICIT_RE.captures_iter(text) {
        let sfs_nr = cap[1].to_string();
        if seen.contains(&format!("sfs:SFS {sfs_nr}")) {
            continue;
        }
        let whole = cap.get(0).expect("group 0 always present");
        let prefix_start = whole.start().saturating_sub(5);
        let prefix = text[prefix_start..whole.start()].trim();
        if prefix.to_uppercase().ends_with("SFS") {
            continue;
        }
        add(
            &mut seen,
            &mut refs,
            LegalReference::Sfs {
                raw_match: sfs_nr.clone(),
                target_sfs: Some(sfs_nr.clone()),
                display: format!("SFS {}", sfs_nr),
            },
        );
    }

    // 12. Bare "§" references, suppressed when the same section number was
    // already captured as part of a kap+§ match.
    let captured_sections: HashSet<String> = refs
        .iter()
        .filter_map(|r| match r {
            LegalReference::Section {
                target_section: Some(s),
                ..
            } => Some(s.clone()),
            _ => None,
        })
        .collect();
    for cap in SECTION_SIMPLE_RE.captures_iter(text) {
        let par = cap[1].to_string();
        if captured_sections.contains(&par) {
            continue;
        }
        let whole = cap.get(0).expect("group 0 always present");
        let number_start = cap.get(1).expect("group 1 always present").start();
        let raw_match = text[number_start..whole.end()].to_string();
        add(
            &mut seen,
            &mut refs,
            LegalReference::Section {
                raw_match,
                target_chapter: None,
                target_section: Some(par.clone()),
                display: format!("{} §", par),
            },
        );
    }

    refs
}

/// Canonical renderer used by the round-trip property in §8 (R1):
/// `extract_references(render(references))` must preserve the multiset of
/// references.
pub fn render(references: &[LegalReference]) -> String {
    references
        .iter()
        .map(|r| r.raw_match())
        .collect::<Vec<_>>()
        .join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_section_and_chapter() {
        let refs = extract_references("Enligt 2 kap. 3 § regeringsformen gäller detta.");
        assert!(refs.iter().any(|r| matches!(
            r,
            LegalReference::Section { target_chapter: Some(k), target_section: Some(p), .. }
                if k == "2" && p == "3"
        )));
    }

    #[test]
    fn explicit_sfs_suppresses_implicit_duplicate() {
        let refs = extract_references("Se SFS 2009:400 för detaljer.");
        let sfs_count = refs.iter().filter(|r| r.ref_type() == "sfs").count();
        assert_eq!(sfs_count, 1);
    }

    #[test]
    fn explicit_sfs_suppresses_later_non_adjacent_implicit_duplicate() {
        let refs = extract_references("Se SFS 2009:400, och igen refereras 2009:400 i texten.");
        let sfs_count = refs.iter().filter(|r| r.ref_type() == "sfs").count();
        assert_eq!(sfs_count, 1);
    }

    #[test]
    fn stycke_suppresses_plain_kap_section() {
        let refs = extract_references("6 kap. 7 § första stycket gäller.");
        let section_refs: Vec<_> = refs
            .iter()
            .filter(|r| r.ref_type() == "section")
            .collect();
        assert_eq!(section_refs.len(), 1);
        assert!(section_refs[0].display().contains("stycket"));
    }

    #[test]
    fn bare_section_suppressed_when_kap_section_present() {
        let refs = extract_references("2 kap. 3 § och 3 § nämns.");
        let with_target_3: Vec<_> = refs
            .iter()
            .filter(|r| matches!(r, LegalReference::Section { target_section: Some(s), .. } if s == "3"))
            .collect();
        assert_eq!(with_target_3.len(), 1);
    }

    #[test]
    fn proposition_and_sou_are_both_extracted() {
        let refs = extract_references("Se prop. 1997/98:45 och SOU 2020:47.");
        assert!(refs.iter().any(|r| r.ref_type() == "proposition"));
        assert!(refs.iter().any(|r| r.ref_type() == "sou"));
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "2 kap. 3 § och SFS 2009:400, se även prop. 1997/98:45.";
        let first = extract_references(text);
        let second = extract_references(text);
        let first_keys: HashSet<_> = first.iter().map(|r| (r.ref_type(), r.raw_match().to_string())).collect();
        let second_keys: HashSet<_> = second.iter().map(|r| (r.ref_type(), r.raw_match().to_string())).collect();
        assert_eq!(first_keys, second_keys);
    }

    #[test]
    fn empty_text_yields_no_references() {
        assert!(extract_references("   ").is_empty());
    }
}
