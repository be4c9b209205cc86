//! The NOID extended-digit alphabet.
//!
//! 29 characters: the ten digits followed by the lowercase consonants minus
//! `l`. Generated identifiers never contain vowels, which keeps them from
//! spelling words.

/// Extended digits in ordinal order.
pub const XDIG_ALPHABET: &[u8; 29] = b"0123456789bcdfghjkmnpqrstvwxz";

/// Radix of an `e`/`f` mask position.
pub const XDIG_RADIX: u64 = 29;

const NO_VALUE: u8 = 255;

/// Ordinal lookup for every byte; [`NO_VALUE`] for bytes outside the alphabet.
const LOOKUP: [u8; 256] = {
    let mut lut = [NO_VALUE; 256];
    let mut i = 0_u8;
    while i < 29 {
        lut[XDIG_ALPHABET[i as usize] as usize] = i;
        i += 1;
    }
    lut
};

/// Returns the ordinal of `c` in [`XDIG_ALPHABET`], if it has one.
#[inline]
pub const fn xdig_ordinal(c: u8) -> Option<u8> {
    match LOOKUP[c as usize] {
        NO_VALUE => None,
        v => Some(v),
    }
}

/// Returns the extended digit with ordinal `value % 29`.
#[inline]
pub const fn xdig_char(value: u64) -> char {
    XDIG_ALPHABET[(value % XDIG_RADIX) as usize] as char
}

/// Computes the NOID check character over `s`.
///
/// Each character is weighted by its 1-based position and contributes its
/// alphabet ordinal; characters outside the alphabet (`/`, `:`, uppercase)
/// contribute nothing but still advance the position.
pub fn check_char(s: &str) -> char {
    let sum = s
        .bytes()
        .enumerate()
        .map(|(i, c)| (i as u64 + 1) * u64::from(xdig_ordinal(c).unwrap_or(0)))
        .sum::<u64>();
    xdig_char(sum)
}

/// Returns true if the last character of `s` is the check character of the
/// rest of the string.
pub fn verify_check_char(s: &str) -> bool {
    match s.char_indices().last() {
        Some((i, last)) => check_char(&s[..i]) == last,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn alphabet_has_no_vowels_or_ell() {
        assert_eq!(XDIG_ALPHABET.len(), 29);
        for c in b"aeiouyl" {
            assert_eq!(xdig_ordinal(*c), None, "{}", *c as char);
        }
        for (i, c) in XDIG_ALPHABET.iter().enumerate() {
            assert_eq!(xdig_ordinal(*c), Some(i as u8));
        }
    }

    #[test]
    fn unknown_characters_only_advance_position() {
        assert_eq!(check_char("b/"), 'b');
        assert_eq!(check_char("/b"), 'p');
        assert_eq!(check_char("ab/c"), '6');
        assert_eq!(check_char(""), '0');
    }

    #[test]
    fn known_check_characters() {
        assert_eq!(check_char("99999/fk44w2"), 's');
        assert_eq!(check_char("99999/fk4159"), 'p');
        assert!(verify_check_char("99999/fk44w2s"));
        assert!(!verify_check_char("99999/fk44w2t"));
        assert!(!verify_check_char(""));
    }

    proptest! {
        #[test]
        fn appended_check_char_verifies(s in "[0-9bcdfghjkmnpqrstvwxz/:]{0,40}") {
            let mut with_check = s.clone();
            with_check.push(check_char(&s));
            prop_assert!(verify_check_char(&with_check));
        }

        #[test]
        fn single_substitution_is_detected(
            s in "[0-9bcdfghjkmnpqrstvwxz]{1,20}",
            pos in any::<prop::sample::Index>(),
            replacement in 0_u64..29,
        ) {
            let i = pos.index(s.len());
            let original = s.as_bytes()[i];
            let swapped = xdig_char(replacement) as u8;
            prop_assume!(original != swapped);

            let mut mutated = s.clone().into_bytes();
            mutated[i] = swapped;
            let mutated = String::from_utf8(mutated).unwrap();
            prop_assert_ne!(check_char(&s), check_char(&mutated));
        }
    }
}
