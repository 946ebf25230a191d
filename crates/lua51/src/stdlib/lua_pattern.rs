//! Lua pattern matching, ported from the reference implementation's
//! backtracking `match` function so `string.find`/`match`/`gmatch`/`gsub`
//! behave exactly like the documented language feature rather than an
//! approximation built on regex crates (Lua patterns are not regexes:
//! `%b`, `%f`, and back-references have no regex equivalent).

const MAX_CAPTURES: usize = 32;
const CAP_UNFINISHED: isize = -1;
const CAP_POSITION: isize = -2;
const MAX_MATCH_DEPTH: i32 = 200;

#[derive(Debug)]
pub struct PatternError(pub String);

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy)]
struct CaptureInfo {
    start: usize,
    len: isize,
}

pub enum Capture {
    Str(Vec<u8>),
    Pos(usize),
}

pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Capture>,
}

struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    level: usize,
    captures: [CaptureInfo; MAX_CAPTURES],
    depth: i32,
}

impl<'a> MatchState<'a> {
    fn new(src: &'a [u8], pat: &'a [u8]) -> Self {
        Self {
            src,
            pat,
            level: 0,
            captures: [CaptureInfo { start: 0, len: 0 }; MAX_CAPTURES],
            depth: MAX_MATCH_DEPTH,
        }
    }

    fn class_end(&self, p: usize) -> Result<usize, PatternError> {
        let mut p = p;
        let c = self.pat[p];
        p += 1;
        match c {
            b'%' => {
                if p == self.pat.len() {
                    return Err(PatternError("malformed pattern (ends with '%')".into()));
                }
                Ok(p + 1)
            }
            b'[' => {
                if self.pat.get(p) == Some(&b'^') {
                    p += 1;
                }
                loop {
                    if p == self.pat.len() {
                        return Err(PatternError("malformed pattern (missing ']')".into()));
                    }
                    let cc = self.pat[p];
                    p += 1;
                    if cc == b'%' && p < self.pat.len() {
                        p += 1;
                    }
                    if p < self.pat.len() && self.pat[p] == b']' {
                        break;
                    }
                }
                Ok(p + 1)
            }
            _ => Ok(p),
        }
    }

    fn match_class(c: u8, cl: u8) -> bool {
        let res = match cl.to_ascii_lowercase() {
            b'a' => c.is_ascii_alphabetic(),
            b'c' => c.is_ascii_control(),
            b'd' => c.is_ascii_digit(),
            b'g' => c.is_ascii_graphic(),
            b'l' => c.is_ascii_lowercase(),
            b'p' => c.is_ascii_punctuation(),
            b's' => c.is_ascii_whitespace() || c == 0x0b,
            b'u' => c.is_ascii_uppercase(),
            b'w' => c.is_ascii_alphanumeric(),
            b'x' => c.is_ascii_hexdigit(),
            other => return other == c,
        };
        if cl.is_ascii_uppercase() {
            !res
        } else {
            res
        }
    }

    fn match_bracket_class(&self, c: u8, p0: usize, ec: usize) -> bool {
        let mut sig = true;
        let mut p = p0;
        if self.pat.get(p + 1) == Some(&b'^') {
            sig = false;
            p += 1;
        }
        loop {
            p += 1;
            if p >= ec {
                break;
            }
            let pc = self.pat[p];
            if pc == b'%' {
                p += 1;
                if p < self.pat.len() && Self::match_class(c, self.pat[p]) {
                    return sig;
                }
            } else if self.pat.get(p + 1) == Some(&b'-') && p + 2 < ec {
                let (lo, hi) = (self.pat[p], self.pat[p + 2]);
                p += 2;
                if lo <= c && c <= hi {
                    return sig;
                }
            } else if pc == c {
                return sig;
            }
        }
        !sig
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        if s >= self.src.len() {
            return false;
        }
        let c = self.src[s];
        match self.pat[p] {
            b'.' => true,
            b'%' => Self::match_class(c, self.pat[p + 1]),
            b'[' => self.match_bracket_class(c, p, ep - 1),
            pc => pc == c,
        }
    }

    fn capture_to_close(&self) -> Result<usize, PatternError> {
        for i in (0..self.level).rev() {
            if self.captures[i].len == CAP_UNFINISHED {
                return Ok(i);
            }
        }
        Err(PatternError("invalid pattern capture".into()))
    }

    fn check_capture(&self, idx: usize) -> Result<usize, PatternError> {
        if idx == 0 || idx > self.level || self.captures[idx - 1].len == CAP_UNFINISHED {
            return Err(PatternError(format!("invalid capture index %{}", idx)));
        }
        Ok(idx - 1)
    }

    fn start_capture(&mut self, s: usize, p: usize, what: isize) -> Result<Option<usize>, PatternError> {
        let level = self.level;
        if level >= MAX_CAPTURES {
            return Err(PatternError("too many captures".into()));
        }
        self.captures[level] = CaptureInfo { start: s, len: what };
        self.level += 1;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.level -= 1;
        }
        Ok(res)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, PatternError> {
        let l = self.capture_to_close()?;
        self.captures[l].len = (s - self.captures[l].start) as isize;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures[l].len = CAP_UNFINISHED;
        }
        Ok(res)
    }

    fn match_capture(&mut self, s: usize, idx: usize) -> Result<Option<usize>, PatternError> {
        let l = self.check_capture(idx)?;
        let (start, len) = (self.captures[l].start, self.captures[l].len as usize);
        if self.src.len() >= s + len && self.src[start..start + len] == self.src[s..s + len] {
            Ok(Some(s + len))
        } else {
            Ok(None)
        }
    }

    fn match_balance(&self, s: usize, p: usize) -> Result<Option<usize>, PatternError> {
        if p + 1 >= self.pat.len() {
            return Err(PatternError("missing arguments to '%b'".into()));
        }
        if s >= self.src.len() || self.src[s] != self.pat[p] {
            return Ok(None);
        }
        let (b, e) = (self.pat[p], self.pat[p + 1]);
        let mut cont = 1i32;
        let mut i = s;
        loop {
            i += 1;
            if i >= self.src.len() {
                break;
            }
            if self.src[i] == e {
                cont -= 1;
                if cont == 0 {
                    return Ok(Some(i + 1));
                }
            } else if self.src[i] == b {
                cont += 1;
            }
        }
        Ok(None)
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, PatternError> {
        let mut i: isize = 0;
        while self.single_match(s + i as usize, p, ep) {
            i += 1;
        }
        while i >= 0 {
            if let Some(r) = self.do_match(s + i as usize, ep + 1)? {
                return Ok(Some(r));
            }
            i -= 1;
        }
        Ok(None)
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, PatternError> {
        loop {
            if let Some(r) = self.do_match(s, ep + 1)? {
                return Ok(Some(r));
            } else if self.single_match(s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn do_match(&mut self, s: usize, p: usize) -> Result<Option<usize>, PatternError> {
        if self.depth == 0 {
            return Err(PatternError("pattern too complex".into()));
        }
        self.depth -= 1;
        let r = self.do_match_loop(s, p);
        self.depth += 1;
        r
    }

    fn do_match_loop(&mut self, mut s: usize, mut p: usize) -> Result<Option<usize>, PatternError> {
        loop {
            if p == self.pat.len() {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CAP_POSITION)
                    } else {
                        self.start_capture(s, p + 1, CAP_UNFINISHED)
                    };
                }
                b')' => {
                    return self.end_capture(s, p + 1);
                }
                b'$' if p + 1 == self.pat.len() => {
                    return Ok(if s == self.src.len() { Some(s) } else { None });
                }
                b'%' if self.pat.get(p + 1) == Some(&b'b') => match self.match_balance(s, p + 2)? {
                    Some(s2) => {
                        s = s2;
                        p += 4;
                        continue;
                    }
                    None => return Ok(None),
                },
                b'%' if self.pat.get(p + 1) == Some(&b'f') => {
                    let pp = p + 2;
                    if self.pat.get(pp) != Some(&b'[') {
                        return Err(PatternError("missing '[' after '%f' in pattern".into()));
                    }
                    let ep = self.class_end(pp)?;
                    let previous = if s == 0 { 0u8 } else { self.src[s - 1] };
                    let current = if s < self.src.len() { self.src[s] } else { 0u8 };
                    if !self.match_bracket_class(previous, pp, ep - 1)
                        && self.match_bracket_class(current, pp, ep - 1)
                    {
                        p = ep;
                        continue;
                    } else {
                        return Ok(None);
                    }
                }
                b'%' if self.pat.get(p + 1).is_some_and(|c| c.is_ascii_digit()) => {
                    let idx = (self.pat[p + 1] - b'0') as usize;
                    match self.match_capture(s, idx)? {
                        Some(s2) => {
                            s = s2;
                            p += 2;
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                _ => {
                    let ep = self.class_end(p)?;
                    if !self.single_match(s, p, ep) {
                        if matches!(self.pat.get(ep), Some(b'*') | Some(b'?') | Some(b'-')) {
                            p = ep + 1;
                            continue;
                        } else {
                            return Ok(None);
                        }
                    } else {
                        match self.pat.get(ep) {
                            Some(b'?') => {
                                if let Some(r) = self.do_match(s + 1, ep + 1)? {
                                    return Ok(Some(r));
                                }
                                p = ep + 1;
                                continue;
                            }
                            Some(b'+') => return self.max_expand(s + 1, p, ep),
                            Some(b'*') => return self.max_expand(s, p, ep),
                            Some(b'-') => return self.min_expand(s, p, ep),
                            _ => {
                                s += 1;
                                p = ep;
                                continue;
                            }
                        }
                    }
                }
            }
        }
    }

    fn push_captures(&self, s: usize, e: usize) -> Result<Vec<Capture>, PatternError> {
        let n = if self.level == 0 { 1 } else { self.level };
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            if i >= self.level {
                out.push(Capture::Str(self.src[s..e].to_vec()));
            } else {
                let cap = self.captures[i];
                if cap.len == CAP_UNFINISHED {
                    return Err(PatternError("unfinished capture".into()));
                }
                if cap.len == CAP_POSITION {
                    out.push(Capture::Pos(cap.start + 1));
                } else {
                    out.push(Capture::Str(self.src[cap.start..cap.start + cap.len as usize].to_vec()));
                }
            }
        }
        Ok(out)
    }
}

/// Search `src` for `pat` starting at byte offset `init`. A leading `^` in
/// `pat` anchors the search to `init` exactly (no sliding).
pub fn find(src: &[u8], pat: &[u8], init: usize) -> Result<Option<MatchResult>, PatternError> {
    let anchor = pat.first() == Some(&b'^');
    let pat_body = if anchor { &pat[1..] } else { pat };
    let mut s = init.min(src.len());
    loop {
        let mut ms = MatchState::new(src, pat_body);
        if let Some(e) = ms.do_match(s, 0)? {
            let captures = ms.push_captures(s, e)?;
            return Ok(Some(MatchResult { start: s, end: e, captures }));
        }
        if anchor || s >= src.len() {
            return Ok(None);
        }
        s += 1;
    }
}

/// Expand a `gsub` replacement template: `%0` is the whole match, `%1`-`%9`
/// are captures, `%%` is a literal `%`.
pub fn expand_replacement(
    template: &[u8],
    whole: &[u8],
    captures: &[Capture],
) -> Result<Vec<u8>, PatternError> {
    let mut out = Vec::with_capacity(template.len());
    let mut i = 0;
    while i < template.len() {
        if template[i] == b'%' {
            i += 1;
            if i >= template.len() {
                return Err(PatternError("invalid use of '%' in replacement string".into()));
            }
            match template[i] {
                b'%' => out.push(b'%'),
                b'0' => out.extend_from_slice(whole),
                d if d.is_ascii_digit() => {
                    let idx = (d - b'0') as usize;
                    if idx == 1 && captures.is_empty() {
                        out.extend_from_slice(whole);
                    } else {
                        let cap = captures.get(idx - 1).ok_or_else(|| {
                            PatternError(format!("invalid capture index %{}", idx))
                        })?;
                        match cap {
                            Capture::Str(s) => out.extend_from_slice(s),
                            Capture::Pos(p) => out.extend_from_slice(p.to_string().as_bytes()),
                        }
                    }
                }
                other => return Err(PatternError(format!("invalid use of '%{}' in replacement string", other as char))),
            }
            i += 1;
        } else {
            out.push(template[i]);
            i += 1;
        }
    }
    Ok(out)
}
