//! Wire encodings shared by the protocols.
//!
//! * RFC 3986 percent-encoding, as required by OAuth signature base strings and headers.
//! * The `Authorization: OAuth ...` header.
//! * Key-Value Form (`key:value\n`), the OpenID direct response body.
//! * `application/x-www-form-urlencoded` query strings and bodies.
use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Error, Result};
use super::fields::NormalizedParameter;

/// Everything outside the RFC 3986 unreserved set.
const RESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Percent-encode everything except the RFC 3986 unreserved set.
pub fn escape(input: &str) -> String {
    utf8_percent_encode(input, RESERVED).to_string()
}

/// Reverse of `escape`. A `+` is kept literally.
///
/// A `%` not followed by two hex digits is refused, naming the broken sequence.
pub fn unescape(input: &str) -> Result<String> {
    for (idx, _) in input.match_indices('%') {
        let valid = input
            .get(idx + 1..idx + 3)
            .map_or(false, |hex| hex.bytes().all(|byte| byte.is_ascii_hexdigit()));
        if !valid {
            let end = input[idx..]
                .char_indices()
                .nth(3)
                .map_or(input.len(), |(offset, _)| idx + offset);
            return Err(Error::format(
                "percent escape",
                format!("broken escape sequence `{}`", &input[idx..end]),
            ));
        }
    }

    percent_decode_str(input)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Error::format("percent escape", "escaped bytes are not utf-8"))
}

/// Render pairs as a form-urlencoded string.
pub fn to_query<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let pairs: Vec<_> = pairs.into_iter().collect();
    // Serializing a sequence of string pairs cannot fail.
    serde_urlencoded::to_string(&pairs).unwrap_or_default()
}

/// Parse a form-urlencoded string, poisoning repeated keys.
pub fn from_query(query: &str) -> Result<NormalizedParameter> {
    serde_urlencoded::from_str::<NormalizedParameter>(query)
        .map_err(|err| Error::format("body", err.to_string()))
}

/// Append the pairs to the query of `url`.
pub fn extend_url<'a, I>(url: &Url, pairs: I) -> Url
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut url = url.clone();
    url.query_pairs_mut().extend_pairs(pairs);
    url
}

/// Assemble an `Authorization` header with the `OAuth` scheme.
///
/// An empty realm is always included, values are RFC 3986 escaped and quoted.
pub fn authorization_header<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut header = String::from("OAuth realm=\"\"");
    for (key, value) in pairs {
        header.push_str(&format!(",{}=\"{}\"", escape(key), escape(value)));
    }
    header
}

/// Read the fields of an `OAuth` authorization header.
///
/// Returns `Ok(None)` for any other authentication scheme. The realm is dropped.
pub fn parse_authorization_header(header: &str) -> Result<Option<Vec<(String, String)>>> {
    let header = header.trim();
    let rest = match header.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("oauth ") => &header[6..],
        _ => return Ok(None),
    };

    let mut fields = Vec::new();
    for item in rest.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let (key, value) = match item.find('=') {
            Some(idx) => (&item[..idx], &item[idx + 1..]),
            None => return Err(Error::format("Authorization", "parameter without value")),
        };

        let key = unescape(key.trim())?;
        if key == "realm" {
            continue;
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .ok_or_else(|| Error::format(key.as_str(), "header value not quoted"))?;
        fields.push((key, unescape(value)?));
    }

    Ok(Some(fields))
}

/// Serialize pairs in Key-Value Form.
pub fn to_key_value_form<'a, I>(pairs: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut form = String::new();
    for (key, value) in pairs {
        if key.contains(':') || key.contains('\n') {
            return Err(Error::format(key, "key-value form keys must not contain ':' or newlines"));
        }
        if value.contains('\n') {
            return Err(Error::format(key, "key-value form values must not contain newlines"));
        }
        form.push_str(key);
        form.push(':');
        form.push_str(value);
        form.push('\n');
    }
    Ok(form)
}

/// Parse a Key-Value Form body. Repeated keys are an error.
pub fn from_key_value_form(form: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for line in form.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let idx = line
            .find(':')
            .ok_or_else(|| Error::format(line, "key-value form line without ':'"))?;
        let (key, value) = (&line[..idx], &line[idx + 1..]);
        if fields.insert(key.to_string(), value.to_string()).is_some() {
            return Err(Error::format(key, "repeated key in key-value form"));
        }
    }
    Ok(fields)
}
