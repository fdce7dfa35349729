//! Content fingerprints for recognizing the CMOS stick.
//!
//! The stick has no reliable label, so it is identified by the exact set of
//! names in its root directory. Images, fragments and recycle bins come and go
//! with normal use and are ignored before comparing.

use std::collections::BTreeSet;

/// Root entries every CMOS stick carries.
pub const BASE_ENTRIES: &[&str] = &["boot", "EFI", "live", "syslinux", "CMOS"];

/// A known-good root directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSignature {
    pub name: &'static str,
    pub files: BTreeSet<String>,
}

impl ContentSignature {
    /// The base entries plus `extra`.
    pub fn base_plus(name: &'static str, extra: &[&str]) -> Self {
        Self {
            name,
            files: BASE_ENTRIES
                .iter()
                .chain(extra)
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// The stick as written by the live image builder and by Rufus in its various modes.
pub fn default_signatures() -> Vec<ContentSignature> {
    vec![
        ContentSignature::base_plus("base", &[]),
        ContentSignature::base_plus("rufus", &["syslinux.cfg", "System Volume Information"]),
        ContentSignature::base_plus(
            "rufus-extended-label",
            &[
                "autorun.ico",
                "autorun.inf",
                "syslinux.cfg",
                "System Volume Information",
            ],
        ),
        ContentSignature::base_plus(
            "rufus-extended-label-no-cfg",
            &["autorun.ico", "autorun.inf", "System Volume Information"],
        ),
        ContentSignature::base_plus("windows-touched", &["System Volume Information"]),
    ]
}

fn is_incidental(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains(".iso") || lower.contains(".part") || lower.contains("recycle")
}

/// Drop image, fragment and recycle-bin entries from a root listing.
pub fn filter_listing<I, S>(listing: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    listing
        .into_iter()
        .filter(|name| !is_incidental(name.as_ref()))
        .map(|name| name.as_ref().to_string())
        .collect()
}

/// First signature exactly equal to the filtered listing.
pub fn matching_signature<'a, I, S>(
    listing: I,
    signatures: &'a [ContentSignature],
) -> Option<&'a ContentSignature>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let filtered = filter_listing(listing);
    signatures.iter().find(|sig| sig.files == filtered)
}

pub fn is_match<I, S>(listing: I, signatures: &[ContentSignature]) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    matching_signature(listing, signatures).is_some()
}
