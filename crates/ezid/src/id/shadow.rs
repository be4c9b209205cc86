//! DOI to shadow-ARK mapping.
//!
//! Every DOI has a companion ARK used for co-indexing and minting. Its NAAN is
//! derived from the numeric DOI prefix `P`:
//!
//! | range             | NAAN                                          |
//! |-------------------|-----------------------------------------------|
//! | `P < 10^5`        | `"bcdfghjkmn"[P / 10^4]` + `P % 10^4` (4 digits) |
//! | `10^5 <= P < 10^6`| `" pqrstvwxz"[P / 10^5]` + `P % 10^4` (lossy)     |
//!
//! The second range drops the ten-thousands digit, so two prefixes can share a
//! NAAN. Callers have to opt in to it.

use crate::{IdentifierName, Scheme, ValidationError};

const EXACT_LEADS: &[u8; 10] = b"bcdfghjkmn";
const LOSSY_LEADS: &[u8; 10] = b" pqrstvwxz";

/// Returns the shadow-ARK NAAN for DOI prefix `10.<prefix>`.
pub fn naan_for_doi_prefix(prefix: &str, allow_lossy: bool) -> Result<String, ValidationError> {
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::UnsupportedDoiPrefix(prefix.to_owned()));
    }
    let p: u32 = prefix
        .parse()
        .map_err(|_| ValidationError::UnsupportedDoiPrefix(prefix.to_owned()))?;

    let lead = match p {
        0..100_000 => EXACT_LEADS[(p / 10_000) as usize],
        100_000..1_000_000 if allow_lossy => LOSSY_LEADS[(p / 100_000) as usize],
        100_000..1_000_000 => return Err(ValidationError::LossyDoiPrefix(p)),
        _ => return Err(ValidationError::UnsupportedDoiPrefix(prefix.to_owned())),
    };
    Ok(format!("{}{:04}", lead as char, p % 10_000))
}

/// Inverse of [`naan_for_doi_prefix`]. For lossy NAANs returns the smallest
/// prefix that maps to it.
pub fn doi_prefix_for_naan(naan: &str) -> Result<u32, ValidationError> {
    let not_shadow = || ValidationError::NotShadowNaan(naan.to_owned());
    let bytes = naan.as_bytes();
    if bytes.len() != 5 || !bytes[1..].iter().all(u8::is_ascii_digit) {
        return Err(not_shadow());
    }
    let low: u32 = naan[1..].parse().map_err(|_| not_shadow())?;

    if let Some(i) = EXACT_LEADS.iter().position(|&c| c == bytes[0]) {
        return Ok(i as u32 * 10_000 + low);
    }
    match LOSSY_LEADS.iter().position(|&c| c == bytes[0]) {
        Some(i) if i > 0 => Ok(i as u32 * 100_000 + low),
        _ => Err(not_shadow()),
    }
}

/// `doi:10.5072/FK2AB` becomes `ark:/b5072/fk2ab`.
pub fn doi_to_shadow_ark(
    doi: &IdentifierName,
    allow_lossy: bool,
) -> Result<IdentifierName, ValidationError> {
    let prefix = doi
        .authority()
        .strip_prefix("10.")
        .filter(|_| doi.is_doi())
        .ok_or_else(|| ValidationError::MalformedIdentifier {
            identifier: doi.to_string(),
            reason: "not a DOI".to_owned(),
        })?;
    let naan = naan_for_doi_prefix(prefix, allow_lossy)?;
    Ok(IdentifierName::from_parts(
        Scheme::Ark,
        naan,
        doi.suffix().to_ascii_lowercase(),
    ))
}

/// `ark:/b5072/fk2ab` becomes `doi:10.5072/FK2AB`. Only defined for NAANs in
/// the exact range.
pub fn shadow_ark_to_doi(ark: &IdentifierName) -> Result<IdentifierName, ValidationError> {
    if !ark.is_ark() {
        return Err(ValidationError::MalformedIdentifier {
            identifier: ark.to_string(),
            reason: "not an ARK".to_owned(),
        });
    }
    let p = doi_prefix_for_naan(ark.authority())?;
    if p >= 100_000 {
        return Err(ValidationError::LossyDoiPrefix(p));
    }
    Ok(IdentifierName::from_parts(
        Scheme::Doi,
        format!("10.{p}"),
        ark.suffix().to_ascii_uppercase(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_range() {
        assert_eq!(naan_for_doi_prefix("5072", false).unwrap(), "b5072");
        assert_eq!(naan_for_doi_prefix("0", false).unwrap(), "b0000");
        assert_eq!(naan_for_doi_prefix("12345", false).unwrap(), "c2345");
        assert_eq!(naan_for_doi_prefix("99999", false).unwrap(), "n9999");
    }

    #[test]
    fn lossy_range_is_opt_in() {
        assert_eq!(
            naan_for_doi_prefix("123456", false),
            Err(ValidationError::LossyDoiPrefix(123_456))
        );
        assert_eq!(naan_for_doi_prefix("123456", true).unwrap(), "p3456");
        assert_eq!(naan_for_doi_prefix("113456", true).unwrap(), "p3456");
        assert_eq!(naan_for_doi_prefix("999999", true).unwrap(), "z9999");
    }

    #[test]
    fn unsupported_prefixes() {
        for prefix in ["1000000", "", "5072.1", "ab"] {
            assert!(
                matches!(
                    naan_for_doi_prefix(prefix, true),
                    Err(ValidationError::UnsupportedDoiPrefix(_))
                ),
                "{prefix}"
            );
        }
    }

    #[test]
    fn identifiers_convert_both_ways() {
        let doi = IdentifierName::parse("doi:10.5072/FK2TEST").unwrap();
        let ark = doi_to_shadow_ark(&doi, false).unwrap();
        assert_eq!(ark.to_string(), "ark:/b5072/fk2test");
        assert_eq!(shadow_ark_to_doi(&ark).unwrap(), doi);

        let plain = IdentifierName::parse("ark:/99999/fk4x").unwrap();
        assert_eq!(
            shadow_ark_to_doi(&plain),
            Err(ValidationError::NotShadowNaan("99999".into()))
        );
        let lossy = IdentifierName::parse("ark:/p3456/x").unwrap();
        assert_eq!(
            shadow_ark_to_doi(&lossy),
            Err(ValidationError::LossyDoiPrefix(103_456))
        );
    }

    proptest! {
        #[test]
        fn exact_prefixes_round_trip(p in 0_u32..100_000) {
            let naan = naan_for_doi_prefix(&p.to_string(), false).unwrap();
            prop_assert_eq!(naan.len(), 5);
            prop_assert_eq!(doi_prefix_for_naan(&naan).unwrap(), p);
        }

        #[test]
        fn lossy_prefixes_round_trip_through_the_naan(p in 100_000_u32..1_000_000) {
            let naan = naan_for_doi_prefix(&p.to_string(), true).unwrap();
            let back = doi_prefix_for_naan(&naan).unwrap();
            prop_assert_eq!(back / 100_000, p / 100_000);
            prop_assert_eq!(naan_for_doi_prefix(&back.to_string(), true).unwrap(), naan);
        }
    }
}
