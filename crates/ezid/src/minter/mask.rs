use crate::{ValidationError, XDIG_RADIX};
use core::fmt;

/// One generated position of a [`Mask`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaskDigit {
    /// `d`: a decimal digit.
    Decimal,
    /// `e`: any extended digit.
    Extended,
    /// `f`: an extended digit that must not be a decimal digit.
    ExtendedLetter,
}

impl MaskDigit {
    pub const fn radix(self) -> u64 {
        match self {
            Self::Decimal => 10,
            Self::Extended | Self::ExtendedLetter => XDIG_RADIX,
        }
    }

    const fn as_char(self) -> char {
        match self {
            Self::Decimal => 'd',
            Self::Extended => 'e',
            Self::ExtendedLetter => 'f',
        }
    }
}

/// The shape of the generated tail of an identifier, e.g. `eedk`.
///
/// Generated positions are `d`, `e` or `f`; a single trailing `k` requests a
/// check character. The mask always has at least one generated position and
/// its identifier space always fits in a `u64`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mask {
    digits: Vec<MaskDigit>,
    check: bool,
}

impl Mask {
    pub fn parse(mask: &str) -> Result<Self, ValidationError> {
        let (body, check) = match mask.strip_suffix('k') {
            Some(body) => (body, true),
            None => (mask, false),
        };
        let digits = body
            .chars()
            .map(|ch| match ch {
                'd' => Ok(MaskDigit::Decimal),
                'e' => Ok(MaskDigit::Extended),
                'f' => Ok(MaskDigit::ExtendedLetter),
                _ => Err(ValidationError::UnsupportedMask {
                    mask: mask.to_owned(),
                    ch,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let parsed = Self { digits, check };
        if parsed.digits.is_empty() || parsed.total().is_none() {
            return Err(ValidationError::InvalidMaskLength(mask.to_owned()));
        }
        Ok(parsed)
    }

    /// Generated positions, most significant first.
    pub fn digits(&self) -> &[MaskDigit] {
        &self.digits
    }

    pub const fn has_check_char(&self) -> bool {
        self.check
    }

    /// Size of the identifier space: the product of the position radixes.
    /// `None` if it does not fit in a `u64`.
    pub fn total(&self) -> Option<u64> {
        self.digits
            .iter()
            .try_fold(1_u64, |acc, d| acc.checked_mul(d.radix()))
    }

    /// The mask produced by a template extension: the first `n` generated
    /// positions prepended to the current ones. The check flag is kept.
    pub fn extended(&self, n: usize) -> Self {
        let head = &self.digits[..n.min(self.digits.len())];
        let mut digits = Vec::with_capacity(head.len() + self.digits.len());
        digits.extend_from_slice(head);
        digits.extend_from_slice(&self.digits);
        Self {
            digits,
            check: self.check,
        }
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.digits {
            write!(f, "{}", d.as_char())?;
        }
        if self.check {
            f.write_str("k")?;
        }
        Ok(())
    }
}
