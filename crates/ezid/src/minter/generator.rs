use crate::{
    Drand48, Error, Mask, MaskDigit, MinterError, RandSource, ValidationError, XDIG_ALPHABET,
    check_char,
};
use std::collections::BTreeMap;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Subcounters are sized so that there are about this many of them.
pub const SUBCOUNTER_DIVISOR: u64 = 293;

/// Number of mask positions prepended on template extension for new minters.
pub const DEFAULT_ATLAST: usize = 3;

/// Mask used when a shoulder is created without an explicit one.
pub const DEFAULT_MASK: &str = "eedk";

/// One slice of the identifier space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subcounter {
    pub top: u64,
    pub value: u64,
}

/// A NOID-compatible identifier generator for one shoulder.
///
/// The identifier space of the current mask is split into roughly 293
/// subcounters of `percounter` slots each. Every step reseeds a [`Drand48`]
/// with the running counter, uses the single draw to pick one of the still
/// active subcounters, bumps it, and renders the compound counter through the
/// mask. Because the draw depends only on persisted state, two minters with
/// the same state always produce the same sequence.
///
/// When every slot of the current mask is used the template is extended by
/// prepending the first `atlast` positions of the mask to itself, and the
/// subcounters are rebuilt for the larger space.
///
/// ```
/// use ezid::Minter;
///
/// let mut minter = Minter::create("99999/fk4", "eedk").unwrap();
/// let ids = minter.mint(3).collect::<Result<Vec<_>, _>>().unwrap();
/// assert_eq!(ids, ["99999/fk44w2s", "99999/fk4159p", "99999/fk4wc7r"]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Minter {
    pub(crate) prefix: String,
    pub(crate) mask: Mask,
    pub(crate) atlast: usize,
    pub(crate) oacounter: u64,
    pub(crate) oatop: u64,
    pub(crate) total: u64,
    pub(crate) basecount: u64,
    pub(crate) percounter: u64,
    pub(crate) counters: BTreeMap<u32, Subcounter>,
    pub(crate) active: Vec<u32>,
    pub(crate) inactive: Vec<u32>,
    /// Fields this implementation does not interpret, kept for round trips.
    pub(crate) extra: BTreeMap<String, String>,
}

impl Minter {
    /// Initializes a fresh minter for `key` (e.g. `99999/fk4`).
    pub fn create(key: &str, mask: &str) -> Result<Self, Error> {
        validate_key(key)?;
        let mask = Mask::parse(mask)?;
        let mut minter = Self {
            prefix: key.to_owned(),
            mask,
            atlast: DEFAULT_ATLAST,
            oacounter: 0,
            oatop: 0,
            total: 0,
            basecount: 0,
            percounter: 0,
            counters: BTreeMap::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            extra: BTreeMap::new(),
        };
        minter.rebuild_counters()?;
        Ok(minter)
    }

    /// The shoulder namespace this minter generates under.
    pub fn key(&self) -> &str {
        &self.prefix
    }

    pub fn template(&self) -> String {
        format!("{}{{{}}}", self.prefix, self.mask)
    }

    pub const fn mask(&self) -> &Mask {
        &self.mask
    }

    pub const fn oacounter(&self) -> u64 {
        self.oacounter
    }

    pub const fn oatop(&self) -> u64 {
        self.oatop
    }

    pub const fn basecount(&self) -> u64 {
        self.basecount
    }

    pub const fn percounter(&self) -> u64 {
        self.percounter
    }

    /// Identifiers minted over the minter's lifetime.
    pub const fn lifetime_count(&self) -> u64 {
        self.basecount + self.oacounter
    }

    pub fn active_subcounters(&self) -> &[u32] {
        &self.active
    }

    pub fn inactive_subcounters(&self) -> &[u32] {
        &self.inactive
    }

    pub fn subcounter(&self, number: u32) -> Option<Subcounter> {
        self.counters.get(&number).copied()
    }

    /// Lazily mints `n` identifiers. The iterator stops after the first
    /// error.
    ///
    /// An `f` position that lands on a decimal digit yields an empty string
    /// for that step; the counter still advances.
    pub fn mint(&mut self, n: usize) -> Mint<'_> {
        Mint {
            minter: self,
            remaining: n,
        }
    }

    /// Produces the next identifier and advances the state.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(key = %self.prefix)))]
    pub fn next_id(&mut self) -> Result<String, MinterError> {
        if self.oacounter >= self.oatop {
            self.extend_template()?;
        }

        let r = Drand48::seeded(self.oacounter).next_f64();
        if self.active.is_empty() {
            return Err(MinterError::Exhausted(self.oacounter));
        }
        // r < 1, so the index is always in range.
        let idx = ((r * self.active.len() as f64) as usize).min(self.active.len() - 1);
        let number = self.active[idx];
        let counter = self
            .counters
            .get_mut(&number)
            .ok_or_else(|| MinterError::MissingSubcounter(subcounter_name(number)))?;

        counter.value += 1;
        let n = counter.value + u64::from(number) * self.percounter;
        if counter.value >= counter.top {
            self.active.remove(idx);
            self.inactive.push(number);
        }
        self.oacounter += 1;

        Ok(self.render(n))
    }

    fn render(&self, mut n: u64) -> String {
        let digits = self.mask.digits();
        let mut tail = vec![0_u8; digits.len()];
        for (slot, digit) in tail.iter_mut().zip(digits).rev() {
            let radix = digit.radix();
            let d = n % radix;
            n /= radix;
            if *digit == MaskDigit::ExtendedLetter && d < 10 {
                return String::new();
            }
            *slot = XDIG_ALPHABET[d as usize];
        }

        let mut id = String::with_capacity(self.prefix.len() + tail.len() + 1);
        id.push_str(&self.prefix);
        id.extend(tail.iter().map(|&b| b as char));
        if self.mask.has_check_char() {
            let check = check_char(&id);
            id.push(check);
        }
        id
    }

    #[cold]
    fn extend_template(&mut self) -> Result<(), MinterError> {
        self.basecount += self.oacounter;
        self.oacounter = 0;
        self.mask = self.mask.extended(self.atlast);
        self.rebuild_counters()?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            key = %self.prefix,
            mask = %self.mask,
            basecount = self.basecount,
            oatop = self.oatop,
            "extended minter template"
        );
        Ok(())
    }

    /// Resets `oatop`, `total`, `percounter` and the subcounters for the
    /// current mask. Every subcounter starts active and unused.
    fn rebuild_counters(&mut self) -> Result<(), MinterError> {
        let total = self
            .mask
            .total()
            .ok_or_else(|| MinterError::InvalidMask(self.mask.to_string()))?;
        let percounter = total / SUBCOUNTER_DIVISOR + 1;

        self.oatop = total;
        self.total = total;
        self.percounter = percounter;
        self.counters.clear();
        self.active.clear();
        self.inactive.clear();

        let mut remaining = total;
        let mut number = 0_u32;
        while remaining > 0 {
            let top = remaining.min(percounter);
            self.counters.insert(number, Subcounter { top, value: 0 });
            self.active.push(number);
            remaining = remaining.saturating_sub(percounter);
            number += 1;
        }
        Ok(())
    }
}

/// Lazy minting iterator returned by [`Minter::mint`].
pub struct Mint<'a> {
    minter: &'a mut Minter,
    remaining: usize,
}

impl Iterator for Mint<'_> {
    type Item = Result<String, MinterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let next = self.minter.next_id();
        self.remaining = if next.is_ok() { self.remaining - 1 } else { 0 };
        Some(next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl core::iter::FusedIterator for Mint<'_> {}

pub(crate) fn subcounter_name(number: u32) -> String {
    format!("c{number}")
}

/// Checks that `key` can name a minter: non-empty `/`-separated segments of
/// printable ASCII without braces, and no `.`/`..` segments.
pub(crate) fn validate_key(key: &str) -> Result<(), ValidationError> {
    let valid = !key.is_empty()
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_graphic() && b != b'{' && b != b'}' && b != b'\\')
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidMinterKey(key.to_owned()))
    }
}
