//! Deterministic names for restored resources
//!
//! `<stack>-<base>-r<N>` for tables, `<stack>-<base>-<token>-r<N>` for
//! buckets. `N` is one more than the generation already encoded in the old
//! physical id, so restoring a restored resource never collides with it.

use rand::Rng;
use regex::Regex;
use stackflow_cloud::ResourceKind;
use std::sync::LazyLock;

static GENERATION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-r(\d+)$").expect("valid generation regex"));

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
pub const BUCKET_TOKEN_LEN: usize = 6;

/// Restoration generation encoded in a physical id (`...-r<N>`), `"0"` if none.
///
/// Kept as a digit string so arbitrarily long generations survive.
pub fn restoration_generation(physical_id: &str) -> &str {
    GENERATION_SUFFIX
        .captures(physical_id)
        .and_then(|caps| caps.get(1))
        .map(|digits| digits.as_str().trim_start_matches('0'))
        .filter(|digits| !digits.is_empty())
        .unwrap_or("0")
}

/// Decimal increment of a digit string
pub fn next_generation(generation: &str) -> String {
    let mut digits: Vec<u8> = generation.bytes().collect();
    for digit in digits.iter_mut().rev() {
        if *digit == b'9' {
            *digit = b'0';
        } else {
            *digit += 1;
            return String::from_utf8_lossy(&digits).into_owned();
        }
    }
    format!("1{}", String::from_utf8_lossy(&digits))
}

/// Lower-cased logical name without its trailing type suffix
pub fn base_name(kind: ResourceKind, logical_name: &str) -> String {
    let suffix = kind.suffix();
    let trimmed = if !suffix.is_empty() && logical_name.len() > suffix.len() {
        logical_name.strip_suffix(suffix).unwrap_or(logical_name)
    } else {
        logical_name
    };
    trimmed.to_lowercase()
}

/// Random lower-case alphanumeric token
pub fn random_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Name for the restored copy of a resource.
///
/// Buckets get a random token spliced in before the generation suffix:
/// bucket names are unique across every account, not just this one.
pub fn derive_restored_resource_name<R: Rng + ?Sized>(
    stack_name: &str,
    kind: ResourceKind,
    logical_name: &str,
    old_physical_id: &str,
    rng: &mut R,
) -> String {
    let generation = next_generation(restoration_generation(old_physical_id));
    let base = base_name(kind, logical_name);

    match kind {
        ResourceKind::Bucket => format!(
            "{}-{}-{}-r{}",
            stack_name.to_lowercase(),
            base,
            random_token(rng, BUCKET_TOKEN_LEN),
            generation
        ),
        _ => format!("{}-{}-r{}", stack_name, base, generation),
    }
}
