use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A signed authentication token presented to the database in place of a password
///
/// Formatting an auth token with `{}` or `{:?}` never reveals it. The
/// alternate `{:#?}` form shows a short prefix for troubleshooting and
/// `{:#}` writes the whole token.
#[braid(debug = "owned", display = "owned")]
pub struct AuthToken;

limited_reveal!(AuthTokenRef: "AUTH TOKEN", 12);

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "rds.example.com:3306/?Action=connect&X-Amz-Signature=abcdef";

    #[test]
    fn plain_formatting_hides_the_token() {
        let token = AuthToken::from(SECRET);

        assert_eq!(format!("{}", token), "***AUTH TOKEN***");
        assert_eq!(format!("{:?}", token), "***AUTH TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = AuthToken::from(SECRET);

        assert_eq!(format!("{:#?}", token), "\"rds.example…\"");
        assert_eq!(format!("{:#5?}", token), "\"rds.…\"");
    }

    #[test]
    fn alternate_display_reveals_everything() {
        let token = AuthToken::from(SECRET);

        assert_eq!(format!("{:#}", token), SECRET);
    }
}
