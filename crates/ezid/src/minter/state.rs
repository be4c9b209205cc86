use crate::minter::generator::{Subcounter, subcounter_name};
use crate::{Mask, Minter, MinterError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key prefix used by legacy BerkeleyDB minter dumps.
pub const LEGACY_KEY_PREFIX: &str = ":/";

const TEMPLATE: &str = "template";
const MASK: &str = "mask";
const ATLAST: &str = "atlast";
const OACOUNTER: &str = "oacounter";
const OATOP: &str = "oatop";
const TOTAL: &str = "total";
const BASECOUNT: &str = "basecount";
const PERCOUNTER: &str = "percounter";
const SACLIST: &str = "saclist";
const SICLIST: &str = "siclist";

const KNOWN_FIELDS: [&str; 10] = [
    TEMPLATE, MASK, ATLAST, OACOUNTER, OATOP, TOTAL, BASECOUNT, PERCOUNTER, SACLIST, SICLIST,
];

/// The persisted, self-describing form of a [`Minter`]: a flat map of
/// string keys to string values.
///
/// Numbers are base-10, subcounter lists are space-separated names, and each
/// subcounter `cN` has `cN/top` and `cN/value` entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinterState(BTreeMap<String, String>);

impl MinterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from a legacy dump, stripping the `:/` key prefix.
    pub fn from_legacy<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| {
                    let k = k.as_ref();
                    let k = k.strip_prefix(LEGACY_KEY_PREFIX).unwrap_or(k);
                    (k.to_owned(), v.into())
                })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn required(&self, field: &str) -> Result<&str, MinterError> {
        self.get(field)
            .ok_or_else(|| MinterError::MissingField(field.to_owned()))
    }

    fn integer(&self, field: &str) -> Result<u64, MinterError> {
        let raw = self.required(field)?;
        raw.trim()
            .parse()
            .map_err(|_| MinterError::InvalidInteger {
                field: field.to_owned(),
                value: raw.to_owned(),
            })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MinterState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Imports a legacy minter dump (keys prefixed with `:/`) and validates it.
pub fn import_legacy<I, K, V>(entries: I) -> Result<Minter, MinterError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    Minter::from_state(&MinterState::from_legacy(entries))
}

impl Minter {
    /// Parses and validates persisted state.
    ///
    /// Fails if a required field is missing or not an integer, the mask has
    /// unsupported characters, `atlast` is not `add<N>`, `oacounter > oatop`,
    /// the template does not embed the mask, or the subcounter lists do not
    /// partition the defined subcounters.
    pub fn from_state(state: &MinterState) -> Result<Self, MinterError> {
        let template = state.required(TEMPLATE)?;
        let mask_field = state.required(MASK)?;
        let (prefix, embedded) = split_template(template).ok_or_else(|| {
            MinterError::TemplateMismatch {
                template: template.to_owned(),
                mask: mask_field.to_owned(),
            }
        })?;
        if embedded != mask_field {
            return Err(MinterError::TemplateMismatch {
                template: template.to_owned(),
                mask: mask_field.to_owned(),
            });
        }
        let mask =
            Mask::parse(mask_field).map_err(|_| MinterError::InvalidMask(mask_field.to_owned()))?;
        let atlast = parse_atlast(state.required(ATLAST)?)?;

        let oacounter = state.integer(OACOUNTER)?;
        let oatop = state.integer(OATOP)?;
        if oacounter > oatop {
            return Err(MinterError::CounterOverflow { oacounter, oatop });
        }
        let total = state.integer(TOTAL)?;
        let basecount = state.integer(BASECOUNT)?;
        let percounter = state.integer(PERCOUNTER)?;

        let active = parse_list(state.required(SACLIST)?)?;
        let inactive = parse_list(state.required(SICLIST)?)?;

        let mut listed = BTreeSet::new();
        for number in active.iter().chain(&inactive) {
            if !listed.insert(*number) {
                return Err(MinterError::InconsistentSubcounters(format!(
                    "{} is listed twice",
                    subcounter_name(*number)
                )));
            }
        }

        let mut counters = BTreeMap::new();
        for &number in &listed {
            let name = subcounter_name(number);
            let top = state.get(&format!("{name}/top"));
            let value = state.get(&format!("{name}/value"));
            let (Some(top), Some(value)) = (top, value) else {
                return Err(MinterError::MissingSubcounter(name));
            };
            let top = parse_counter_field(&name, "top", top)?;
            let value = parse_counter_field(&name, "value", value)?;
            if value > top {
                return Err(MinterError::InconsistentSubcounters(format!(
                    "{name} value {value} exceeds top {top}"
                )));
            }
            counters.insert(number, Subcounter { top, value });
        }

        for number in &active {
            if counters.get(number).is_some_and(|c| c.value == c.top) {
                return Err(MinterError::InconsistentSubcounters(format!(
                    "exhausted {} is still active",
                    subcounter_name(*number)
                )));
            }
        }

        let mut extra = BTreeMap::new();
        for (key, value) in state.iter() {
            if KNOWN_FIELDS.contains(&key) {
                continue;
            }
            if let Some(number) = subcounter_entry(key) {
                if !listed.contains(&number) {
                    return Err(MinterError::InconsistentSubcounters(format!(
                        "{key} belongs to no list"
                    )));
                }
                continue;
            }
            extra.insert(key.to_owned(), value.to_owned());
        }

        Ok(Self {
            prefix: prefix.to_owned(),
            mask,
            atlast,
            oacounter,
            oatop,
            total,
            basecount,
            percounter,
            counters,
            active,
            inactive,
            extra,
        })
    }

    /// Serializes the minter into its persisted form.
    pub fn to_state(&self) -> MinterState {
        let mut state: MinterState = self.extra.clone().into_iter().collect();
        state.insert(TEMPLATE, self.template());
        state.insert(MASK, self.mask.to_string());
        state.insert(ATLAST, format!("add{}", self.atlast));
        state.insert(OACOUNTER, self.oacounter.to_string());
        state.insert(OATOP, self.oatop.to_string());
        state.insert(TOTAL, self.total.to_string());
        state.insert(BASECOUNT, self.basecount.to_string());
        state.insert(PERCOUNTER, self.percounter.to_string());
        state.insert(SACLIST, join_list(&self.active));
        state.insert(SICLIST, join_list(&self.inactive));
        for (number, counter) in &self.counters {
            let name = subcounter_name(*number);
            state.insert(format!("{name}/top"), counter.top.to_string());
            state.insert(format!("{name}/value"), counter.value.to_string());
        }
        state
    }
}

fn split_template(template: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = template.split_once('{')?;
    let mask = rest.strip_suffix('}')?;
    Some((prefix, mask))
}

fn parse_atlast(raw: &str) -> Result<usize, MinterError> {
    raw.strip_prefix("add")
        .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| MinterError::InvalidAtlast(raw.to_owned()))
}

fn parse_subcounter_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('c')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_list(raw: &str) -> Result<Vec<u32>, MinterError> {
    raw.split_whitespace()
        .map(|name| {
            parse_subcounter_name(name).ok_or_else(|| {
                MinterError::InconsistentSubcounters(format!("{name:?} is not a subcounter name"))
            })
        })
        .collect()
}

fn join_list(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(|n| subcounter_name(*n))
        .collect::<Vec<_>>()
        .join(" ")
}

fn subcounter_entry(key: &str) -> Option<u32> {
    let (name, field) = key.split_once('/')?;
    if field != "top" && field != "value" {
        return None;
    }
    parse_subcounter_name(name)
}

fn parse_counter_field(name: &str, field: &str, raw: &str) -> Result<u64, MinterError> {
    raw.trim()
        .parse()
        .map_err(|_| MinterError::InvalidInteger {
            field: format!("{name}/{field}"),
            value: raw.to_owned(),
        })
}
