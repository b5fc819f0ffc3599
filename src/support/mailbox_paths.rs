//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use crate::support::error::Error;

/// Given a raw mailbox name, emit the parts that comprise the actual name.
///
/// This accounts for the hierarchy delimiter, empty segments, and the
/// required case-insensitivity of the root `INBOX` mailbox.
///
/// It does not check for name safety.
pub fn parse_mailbox_path(
    path: &str,
    delimiter: char,
) -> impl Iterator<Item = &str> + '_ {
    path.split(delimiter)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(ix, s)| {
            if 0 == ix && "inbox".eq_ignore_ascii_case(s) {
                "INBOX"
            } else {
                s
            }
        })
}

/// Validate `name` and return its canonical form.
///
/// Unlike `parse_mailbox_path`, empty segments are rejected rather than
/// skipped, since a stored mailbox name must round-trip exactly. Wildcards
/// and control characters are never permitted in a stored name.
pub fn normalise_mailbox_name(
    name: &str,
    delimiter: char,
) -> Result<String, Error> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c.is_control() || '*' == c || '%' == c)
    {
        return Err(Error::UnsafeName);
    }

    let mut normalised = String::with_capacity(name.len());
    for (ix, segment) in name.split(delimiter).enumerate() {
        if segment.is_empty() {
            return Err(Error::UnsafeName);
        }

        if ix > 0 {
            normalised.push(delimiter);
        }

        if 0 == ix && "inbox".eq_ignore_ascii_case(segment) {
            normalised.push_str("INBOX");
        } else {
            normalised.push_str(segment);
        }
    }

    Ok(normalised)
}

/// Return the names of all strict ancestors of `name`, outermost first.
pub fn ancestor_names(name: &str, delimiter: char) -> Vec<&str> {
    name.match_indices(delimiter)
        .map(|(ix, _)| &name[..ix])
        .collect()
}

/// Return whether `child` lies anywhere below `parent` in the hierarchy.
pub fn is_descendant(parent: &str, child: &str, delimiter: char) -> bool {
    child.len() > parent.len()
        && child.starts_with(parent)
        && child[parent.len()..].starts_with(delimiter)
}

/// Creates a predicate which identifies which normalised mailbox names match
/// any element of `patterns`, with pattern matching performed as per RFC 3501.
///
/// `*` matches any sequence of characters, including the delimiter. `%`
/// matches any sequence not containing the delimiter.
///
/// Each pattern is first normalised by `parse_mailbox_path`.
pub fn mailbox_path_matcher<'a>(
    patterns: impl IntoIterator<Item = &'a str>,
    delimiter: char,
) -> impl Fn(&str) -> bool + 'a {
    let escaped_delimiter = regex::escape(delimiter.encode_utf8(&mut [0; 4]));
    let mut rx = "^(".to_owned();
    for (pattern_ix, pattern) in patterns.into_iter().enumerate() {
        if pattern_ix > 0 {
            rx.push('|');
        }

        for (part_ix, part) in
            parse_mailbox_path(pattern, delimiter).enumerate()
        {
            if part_ix > 0 {
                rx.push_str(&escaped_delimiter);
            }

            let mut start = 0;
            for end in part
                .match_indices(|c| '%' == c || '*' == c)
                .map(|(ix, _)| ix)
                .chain(part.len()..=part.len())
            {
                let chunk = &part[start..end];
                start = (end + 1).min(part.len());

                rx.push_str(&regex::escape(chunk));
                match part.get(end..end + 1) {
                    Some("*") => rx.push_str(".*"),
                    Some("%") => {
                        rx.push_str("[^");
                        rx.push_str(&escaped_delimiter);
                        rx.push_str("]*");
                    },
                    _ => (),
                }
            }
        }
    }
    rx.push_str(")$");

    let rx = regex::Regex::new(&rx).expect("Built invalid regex?");
    move |s| rx.is_match(s)
}
