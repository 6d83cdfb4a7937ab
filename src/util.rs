#![allow(unused_imports)]
#![allow(unused_macros)]

// Populate a HashSet.
#[cfg(test)]
macro_rules! set(
    { $($key:expr),+ } => {
        {
            let mut m = ::std::collections::HashSet::new();
            $(
                m.insert($key);
            )+
            m
        }
     };
);

#[cfg(test)]
pub(crate) use set;

// Round `n` to 3 decimal places.
pub fn three_places(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}

// Round `n` to 2 decimal places, used throughout the stats block.
pub fn two_places(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

// If the value contains a , or " then quote the string, and double every ".
// Used by Table::to_csv_string (§4.E) — trackers only ever write numbers and
// plain identifiers through this path, so most calls are a no-op allocation.
pub fn csv_quote(s: &str) -> String {
    let mut t = "".to_string();
    let mut must_quote = false;
    for c in s.chars() {
        match c {
            '"' => {
                t.push(c);
                t.push(c);
                must_quote = true;
            }
            ',' => {
                t.push(c);
                must_quote = true;
            }
            _ => {
                t.push(c);
            }
        }
    }
    if must_quote {
        t = "\"".to_string() + &t + "\""
    }
    t
}

// Snap a memory amount in MiB to one of the small fixed brackets, or round up
// to the next whole GiB beyond them. Mirrors the allocation recommendation's
// "don't ask for an oddly precise number" behavior.
pub fn round_memory(mb: f64) -> u64 {
    const BRACKETS: [u64; 5] = [128, 256, 512, 1024, 2048];
    for b in BRACKETS {
        if mb <= b as f64 {
            return b;
        }
    }
    let rounded_gb = mb / 1024.0;
    let whole = rounded_gb.floor();
    let remainder = rounded_gb - whole;
    let gb = if remainder > 0.0 { whole + 1.0 } else { whole };
    (1024.0 * gb) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quote_test() {
        assert!(&csv_quote("abcde") == "abcde");
        assert!(&csv_quote(r#"abc,de"#) == r#""abc,de""#);
        assert!(&csv_quote(r#"abc"de"#) == r#""abc""de""#);
        assert!(&csv_quote(r#"abc""de"#) == r#""abc""""de""#);
    }

    #[test]
    fn round_memory_brackets() {
        assert_eq!(round_memory(68.0), 128);
        assert_eq!(round_memory(896.0), 1024);
        assert_eq!(round_memory(3863.0), 4096);
        assert_eq!(round_memory(12_000.0), 12 * 1024);
    }
}
