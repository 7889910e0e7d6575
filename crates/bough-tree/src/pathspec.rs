//! Pathspecs: path patterns that limit which tree entries a walk visits.
//!
//! A pathspec is a list of items. Each item is a path pattern, optionally
//! prefixed with magic:
//!
//! - `:(literal)path` never treats `*?[\` as wildcards
//! - `:(glob)pat` makes `*` stop at `/` (and `**` cross it)
//! - `:(icase)path` compares case-insensitively
//! - `:(exclude)path`, `:!path` or `:^path` removes matches
//!
//! Long-form magic may be combined, e.g. `:(icase,exclude)*.O`.
//!
//! The matcher answers one question per tree entry, given the path of the
//! directory the entry lives in (`base`, empty or ending in `/`): could the
//! entry, or anything below it, match? The answer also tells the walker
//! when nothing later at the same level can match, so it can stop early.

use crate::entry::TreeEntry;
use crate::{Result, TreeError};
use glob::{MatchOptions, Pattern};
use std::cmp::Ordering;
use tracing::trace;

const GLOB_SPECIAL: &[u8] = b"*?[\\";

/// How interesting a tree entry is for a pathspec.
///
/// Variants are ordered from least to most interesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Interest {
    /// Neither this entry nor any later entry at this level can match.
    AllNotInteresting,
    /// This entry does not match, later ones might.
    NotInteresting,
    /// This entry matches, or may contain matches.
    Interesting,
    /// This entry and everything after it at this level matches.
    AllInteresting,
}

impl Interest {
    /// True for [`Interest::Interesting`] and [`Interest::AllInteresting`].
    pub fn is_interesting(self) -> bool {
        self >= Interest::Interesting
    }
}

/// Magic flags of one pathspec item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Magic {
    /// No wildcards.
    pub literal: bool,
    /// Wildcards do not match `/`.
    pub glob: bool,
    /// Case-insensitive.
    pub icase: bool,
    /// Matches are removed instead of added.
    pub exclude: bool,
}

impl Magic {
    fn set(&mut self, name: &str) -> Result<()> {
        match name {
            "literal" => self.literal = true,
            "glob" => self.glob = true,
            "icase" => self.icase = true,
            "exclude" => self.exclude = true,
            // There is no working-directory prefix to strip.
            "top" => {}
            other => {
                return Err(TreeError::InvalidPathspec(format!(
                    "invalid pathspec magic '{}'",
                    other
                )))
            }
        }
        Ok(())
    }
}

/// One pattern of a [`Pathspec`].
#[derive(Debug, Clone)]
pub struct PathspecItem {
    pattern: Vec<u8>,
    original: String,
    nowildcard_len: usize,
    magic: Magic,
    onestar: bool,
}

fn simple_length(pattern: &[u8]) -> usize {
    pattern
        .iter()
        .position(|b| GLOB_SPECIAL.contains(b))
        .unwrap_or(pattern.len())
}

fn no_wildcard(pattern: &[u8]) -> bool {
    simple_length(pattern) == pattern.len()
}

impl PathspecItem {
    /// Creates an item from a bare pattern and explicit magic.
    pub fn new(pattern: impl Into<Vec<u8>>, magic: Magic) -> Self {
        let pattern = pattern.into();
        let original = String::from_utf8_lossy(&pattern).into_owned();
        Self::build(pattern, original, magic)
    }

    fn build(pattern: Vec<u8>, original: String, magic: Magic) -> Self {
        let nowildcard_len = if magic.literal {
            pattern.len()
        } else {
            simple_length(&pattern)
        };
        let onestar = !magic.glob
            && nowildcard_len < pattern.len()
            && pattern[nowildcard_len] == b'*'
            && no_wildcard(&pattern[nowildcard_len + 1..]);
        Self {
            pattern,
            original,
            nowildcard_len,
            magic,
            onestar,
        }
    }

    /// Parses one pathspec element, including its magic prefix.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut magic = Magic::default();
        let rest = if let Some(long) = spec.strip_prefix(":(") {
            let close = long.find(')').ok_or_else(|| {
                TreeError::InvalidPathspec(format!(
                    "missing ')' at the end of pathspec magic in '{}'",
                    spec
                ))
            })?;
            for name in long[..close].split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    magic.set(name)?;
                }
            }
            &long[close + 1..]
        } else if let Some(short) = spec.strip_prefix(':') {
            let mut end = short.len();
            for (i, c) in short.char_indices() {
                match c {
                    '!' | '^' => magic.exclude = true,
                    '/' => {}
                    ':' => {
                        end = i + 1;
                        break;
                    }
                    _ => {
                        end = i;
                        break;
                    }
                }
            }
            &short[end..]
        } else {
            spec
        };

        if magic.literal && magic.glob {
            return Err(TreeError::InvalidPathspec(format!(
                "'literal' and 'glob' are incompatible in '{}'",
                spec
            )));
        }

        Ok(Self::build(rest.as_bytes().to_vec(), spec.to_string(), magic))
    }

    /// The pattern without magic.
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// The element as written by the user.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Magic flags.
    pub fn magic(&self) -> Magic {
        self.magic
    }

    /// Length of the leading part without wildcards.
    pub fn nowildcard_len(&self) -> usize {
        self.nowildcard_len
    }

    /// True when the pattern is a literal prefix followed by a single `*`
    /// and a literal suffix, which is matched without the glob engine.
    pub fn is_onestar(&self) -> bool {
        self.onestar
    }

    fn has_wildcard(&self) -> bool {
        self.nowildcard_len < self.pattern.len()
    }
}

/// A set of pathspec items plus the global matching flags.
#[derive(Debug, Clone, Default)]
pub struct Pathspec {
    items: Vec<PathspecItem>,
    has_wildcard: bool,
    has_exclude: bool,
    recursive: bool,
    max_depth: Option<usize>,
}

impl Pathspec {
    /// An empty pathspec; it matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every element. When all of them are exclusions, an implicit
    /// match-everything item is added so the exclusions have something to
    /// remove from.
    pub fn parse<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items = specs
            .into_iter()
            .map(|s| PathspecItem::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_items(items))
    }

    /// Builds a pathspec from already constructed items.
    pub fn from_items(mut items: Vec<PathspecItem>) -> Self {
        if !items.is_empty() && items.iter().all(|item| item.magic.exclude) {
            items.push(PathspecItem::new(Vec::new(), Magic::default()));
        }
        let has_wildcard = items.iter().any(PathspecItem::has_wildcard);
        let has_exclude = items.iter().any(|item| item.magic.exclude);
        Self {
            items,
            has_wildcard,
            has_exclude,
            recursive: false,
            max_depth: None,
        }
    }

    /// Whether directories are descended into to find matches below them.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Limits how deep below a matched directory entries still match.
    /// Only honored for recursive pathspecs.
    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The items, in declaration order.
    pub fn items(&self) -> &[PathspecItem] {
        &self.items
    }

    /// True when the pathspec has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn depth_limit(&self) -> Option<usize> {
        if self.recursive {
            self.max_depth
        } else {
            None
        }
    }

    /// Decides how interesting `entry` is when it lives under `base`.
    ///
    /// `base` is empty at the top level and otherwise ends with `/`.
    pub fn interesting(&self, entry: &TreeEntry<'_>, base: &[u8]) -> Interest {
        let positive = self.do_match(entry, base, false);
        if !self.has_exclude || positive <= Interest::NotInteresting {
            return positive;
        }

        let negative = self.do_match(entry, base, true);
        trace!(?positive, ?negative, "pathspec exclusion");

        if positive == Interest::AllInteresting && negative == Interest::NotInteresting {
            return Interest::Interesting;
        }
        if negative <= Interest::NotInteresting {
            return positive;
        }
        // An exclusion matching a directory may still leave some of its
        // files, so the directory stays interesting.
        if entry.is_dir()
            && positive >= Interest::Interesting
            && negative == Interest::Interesting
        {
            return Interest::Interesting;
        }
        if (positive == Interest::Interesting && negative >= Interest::Interesting)
            || (positive == Interest::AllInteresting && negative == Interest::Interesting)
        {
            return Interest::NotInteresting;
        }
        Interest::AllNotInteresting
    }

    fn do_match(&self, entry: &TreeEntry<'_>, base: &[u8], exclude: bool) -> Interest {
        let baselen = base.len();
        let mut never_interesting = if self.has_wildcard {
            Interest::NotInteresting
        } else {
            Interest::AllNotInteresting
        };

        if self.items.is_empty() {
            return match self.depth_limit() {
                None => Interest::AllInteresting,
                Some(max) if within_depth(base, usize::from(entry.is_dir()), max) => {
                    Interest::Interesting
                }
                Some(_) => Interest::NotInteresting,
            };
        }

        let pathlen = entry.len();

        // Later items first: the pruning below depends on it.
        for item in self.items.iter().rev() {
            if item.magic.exclude != exclude {
                continue;
            }
            let pattern = item.pattern.as_slice();
            let matchlen = pattern.len();

            if baselen >= matchlen {
                if match_dir_prefix(item, base, pattern) {
                    return match self.depth_limit() {
                        None => Interest::AllInteresting,
                        Some(max) => {
                            let below = base.get(matchlen + 1..).unwrap_or(&[]);
                            if within_depth(below, usize::from(entry.is_dir()), max) {
                                Interest::Interesting
                            } else {
                                Interest::NotInteresting
                            }
                        }
                    };
                }
            } else if baselen == 0 || basecmp(item, base, pattern, baselen) == Ordering::Equal {
                if match_entry(item, entry, &pattern[baselen..], &mut never_interesting) {
                    return Interest::Interesting;
                }
                if item.has_wildcard() {
                    let prefix = item.nowildcard_len as isize - baselen as isize;
                    if git_fnmatch(item, &pattern[baselen..], entry.path, prefix) {
                        return Interest::Interesting;
                    }
                    // Keep every directory; files below are matched later.
                    if self.recursive && entry.is_dir() {
                        return Interest::Interesting;
                    }
                }
                continue;
            }

            if !item.has_wildcard() {
                continue;
            }
            if item.nowildcard_len > 0 && !match_wildcard_base(item, base) {
                continue;
            }

            let mut full = Vec::with_capacity(baselen + pathlen);
            full.extend_from_slice(base);
            full.extend_from_slice(entry.path);
            if git_fnmatch(item, pattern, &full, item.nowildcard_len as isize) {
                return Interest::Interesting;
            }
            if self.recursive && entry.is_dir() {
                return Interest::Interesting;
            }
        }

        never_interesting
    }
}

/// True when `name` has at most `max_depth` levels of directories, counting
/// from `depth`.
pub fn within_depth(name: &[u8], depth: usize, max_depth: usize) -> bool {
    let mut depth = depth;
    for &b in name {
        if b == b'/' {
            depth += 1;
            if depth > max_depth {
                return false;
            }
        }
    }
    true
}

/// Byte at `i`, or NUL past the end, so slices compare like C strings.
#[inline]
fn byte_at(s: &[u8], i: usize) -> u8 {
    s.get(i).copied().unwrap_or(0)
}

fn strncmp(a: &[u8], b: &[u8], n: usize, icase: bool) -> Ordering {
    for i in 0..n {
        let (mut x, mut y) = (byte_at(a, i), byte_at(b, i));
        if icase {
            x = x.to_ascii_lowercase();
            y = y.to_ascii_lowercase();
        }
        if x != y {
            return x.cmp(&y);
        }
        if x == 0 {
            break;
        }
    }
    Ordering::Equal
}

fn ps_strncmp(item: &PathspecItem, a: &[u8], b: &[u8], n: usize) -> Ordering {
    strncmp(a, b, n, item.magic.icase)
}

fn basecmp(item: &PathspecItem, base: &[u8], pattern: &[u8], len: usize) -> Ordering {
    ps_strncmp(item, base, pattern, len)
}

/// The pattern names `base` itself or a directory containing it.
fn match_dir_prefix(item: &PathspecItem, base: &[u8], pattern: &[u8]) -> bool {
    let matchlen = pattern.len();
    if basecmp(item, base, pattern, matchlen) != Ordering::Equal {
        return false;
    }
    matchlen == 0 || byte_at(base, matchlen) == b'/' || pattern[matchlen - 1] == b'/'
}

/// Matches the part of the pattern below `base` against the entry name.
///
/// Clears `never_interesting` once some pattern sorts at or after the
/// entry, since a later entry could still match it.
fn match_entry(
    item: &PathspecItem,
    entry: &TreeEntry<'_>,
    pattern: &[u8],
    never_interesting: &mut Interest,
) -> bool {
    let pathlen = entry.len();
    let matchlen = pattern.len();
    let mut cmp = None;

    if item.magic.icase {
        // Case folding breaks the ordering argument.
        *never_interesting = Interest::NotInteresting;
    } else if *never_interesting != Interest::NotInteresting {
        let c = strncmp(pattern, entry.path, matchlen.min(pathlen), false);
        if c == Ordering::Less {
            return false;
        }
        cmp = Some(c);
        *never_interesting = Interest::NotInteresting;
    }

    if pathlen > matchlen {
        return false;
    }
    if matchlen > pathlen {
        if pattern[pathlen] != b'/' {
            return false;
        }
        if !entry.is_dir() && !entry.is_gitlink() {
            return false;
        }
    }

    let cmp = cmp.unwrap_or_else(|| ps_strncmp(item, pattern, entry.path, pathlen));
    cmp == Ordering::Equal
}

/// Matches `base` against the literal leading part of a wildcard pattern.
fn match_wildcard_base(item: &PathspecItem, base: &[u8]) -> bool {
    let matchlen = item.nowildcard_len;
    let baselen = base.len();
    if baselen == 0 {
        return true;
    }
    if baselen >= matchlen {
        return basecmp(item, base, &item.pattern, matchlen) == Ordering::Equal;
    }
    basecmp(item, base, &item.pattern, baselen) == Ordering::Equal
}

/// Wildcard match of `string` against `pattern`, the first `prefix` bytes
/// compared literally.
fn git_fnmatch(item: &PathspecItem, pattern: &[u8], string: &[u8], prefix: isize) -> bool {
    let (mut pattern, mut string) = (pattern, string);
    if prefix > 0 {
        let prefix = prefix as usize;
        if ps_strncmp(item, pattern, string, prefix) != Ordering::Equal {
            return false;
        }
        pattern = pattern.get(prefix..).unwrap_or(&[]);
        string = string.get(prefix..).unwrap_or(&[]);
    }

    if item.onestar && pattern.first() == Some(&b'*') {
        let suffix = &pattern[1..];
        return string.len() >= suffix.len()
            && strncmp(
                suffix,
                &string[string.len() - suffix.len()..],
                suffix.len(),
                item.magic.icase,
            ) == Ordering::Equal;
    }

    wildmatch(pattern, string, item.magic.glob, item.magic.icase)
}

fn wildmatch(pattern: &[u8], string: &[u8], pathname: bool, icase: bool) -> bool {
    let pattern = String::from_utf8_lossy(pattern);
    let string = String::from_utf8_lossy(string);
    let options = MatchOptions {
        case_sensitive: !icase,
        require_literal_separator: pathname,
        require_literal_leading_dot: false,
    };
    match Pattern::new(&to_glob_syntax(&pattern, pathname)) {
        Ok(compiled) => compiled.matches_with(&string, options),
        // Not a valid glob: fall back to a literal comparison.
        Err(_) if icase => pattern.eq_ignore_ascii_case(&string),
        Err(_) => pattern == string,
    }
}

/// Rewrites a git wildcard pattern into the dialect `glob::Pattern`
/// understands.
///
/// Backslash escapes become one-character classes and `[^` becomes `[!`.
/// A run of stars is `**` only when it spans a whole component in pathname
/// mode; anywhere else git treats it as a single `*`.
fn to_glob_syntax(pattern: &str, pathname: bool) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                push_literal(&mut out, chars[i + 1]);
                i += 2;
            }
            '*' => {
                let start = i;
                while chars.get(i) == Some(&'*') {
                    i += 1;
                }
                let whole_component = (start == 0 || chars[start - 1] == '/')
                    && chars.get(i).map_or(true, |&c| c == '/');
                if pathname && i - start > 1 && whole_component {
                    out.push_str("**");
                } else {
                    out.push('*');
                }
            }
            '[' => {
                out.push('[');
                i += 1;
                if matches!(chars.get(i), Some('!' | '^')) {
                    out.push('!');
                    i += 1;
                }
                if chars.get(i) == Some(&']') {
                    out.push(']');
                    i += 1;
                }
                while let Some(&c) = chars.get(i) {
                    i += 1;
                    if c == ']' {
                        out.push(c);
                        break;
                    }
                    if c == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            out.push(escaped);
                            i += 1;
                            continue;
                        }
                    }
                    out.push(c);
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn push_literal(out: &mut String, c: char) {
    if matches!(c, '*' | '?' | '[' | ']') {
        out.push('[');
        out.push(c);
        out.push(']');
    } else {
        out.push(c);
    }
}
