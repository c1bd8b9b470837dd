//! Caveats: typed restrictions attached to a token.
//!
//! On the wire every caveat is a single line `"<kind> = <value>"`. Those exact
//! bytes feed the macaroon signature chain, so the text form of each value is
//! canonical: parsing it back and re-rendering yields the same string.
//!
//! Evaluation is split from the data. A [`Caveat`] only carries kind and value;
//! the [`CaveatRegistry`] decides whether it holds for a [`RequestContext`].
//! Built-in kinds are always evaluated by the registry itself, custom kinds by
//! predicates registered under their name.
//!
//! # Unknown kinds
//!
//! A custom caveat whose kind has no registered predicate is resolved by the
//! registry's [`UnknownCaveatPolicy`]. The default is [`UnknownCaveatPolicy::Allow`]:
//! a token restricted by something this server cannot evaluate is still
//! admitted. This keeps tokens valid when their predicate only existed where
//! they were issued, at the cost of ignoring restrictions added by holders.
//! Deployments that attenuate tokens client-side should switch to
//! [`UnknownCaveatPolicy::Deny`].

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;

use crate::encoding::Base64Bytes;
use crate::error::Error;
use crate::identifier::PAYMENT_HASH_LEN;
use crate::timestamp::UnixMillis;

/// Separator between kind and value.
pub const SEPARATOR: &str = " = ";

/// Kind name of the expiration caveat.
pub const EXPIRATION: &str = "expiration";
/// Kind name of the path caveat.
pub const PATH: &str = "path";
/// Kind name of the method caveat.
pub const METHOD: &str = "method";
/// Kind name of the IP caveat.
pub const IP: &str = "ip";
/// Kind name of the origin caveat.
pub const ORIGIN: &str = "origin";
/// Kind name of the payment-hash caveat.
pub const PAYMENT_HASH: &str = "payment-hash";

const RESERVED: [&str; 6] = [EXPIRATION, PATH, METHOD, IP, ORIGIN, PAYMENT_HASH];

/// Header consulted by the `ip` caveat.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Header consulted by the `origin` caveat.
pub const ORIGIN_HEADER: &str = "origin";

/// A restriction attached to a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caveat {
    /// Absolute deadline; the request must happen at or before it.
    Expiration(UnixMillis),
    /// Glob over the request path, `*` matching any run of characters.
    Path(String),
    /// Allowed HTTP methods, stored upper-case.
    Method(Vec<String>),
    /// Allowed client addresses, taken from the first `X-Forwarded-For` entry.
    Ip(Vec<IpAddr>),
    /// Allowed `Origin` header values.
    Origin(Vec<String>),
    /// The invoice payment hash the token is bound to.
    PaymentHash([u8; PAYMENT_HASH_LEN]),
    /// Caller-defined restriction, evaluated by a registered predicate.
    Custom {
        /// Kind name; never one of the built-in kinds.
        kind: String,
        /// Opaque value text.
        value: String,
    },
}

impl Caveat {
    /// Expiration caveat for an absolute deadline.
    #[must_use]
    pub const fn expiration(deadline: UnixMillis) -> Self {
        Self::Expiration(deadline)
    }

    /// Payment-hash caveat for a raw 32-byte hash.
    #[must_use]
    pub const fn payment_hash(hash: [u8; PAYMENT_HASH_LEN]) -> Self {
        Self::PaymentHash(hash)
    }

    /// Path caveat for a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if the pattern is empty or spans lines.
    pub fn path(pattern: impl Into<String>) -> Result<Self, Error> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(Error::caveat("path pattern is empty"));
        }
        check_single_line(&pattern)?;
        Ok(Self::Path(pattern))
    }

    /// Method caveat for a set of HTTP method names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if the set is empty or a name is not a token.
    pub fn methods<I, S>(methods: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let methods = methods
            .into_iter()
            .map(|m| {
                let m = m.as_ref().trim();
                if m.is_empty() || !m.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-') {
                    return Err(Error::caveat(format!("invalid method {m:?}")));
                }
                Ok(m.to_ascii_uppercase())
            })
            .collect::<Result<Vec<_>, _>>()?;
        non_empty(METHOD, &methods)?;
        Ok(Self::Method(methods))
    }

    /// IP caveat for a set of address literals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if the set is empty or an entry is not an IP address.
    pub fn ips<I, S>(ips: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ips = ips
            .into_iter()
            .map(|ip| {
                let ip = ip.as_ref().trim();
                IpAddr::from_str(ip).map_err(|_| Error::caveat(format!("invalid ip {ip:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        non_empty(IP, &ips)?;
        Ok(Self::Ip(ips))
    }

    /// Origin caveat for a set of origin strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if the set is empty or an entry contains
    /// a comma, whitespace or a line break.
    pub fn origins<I, S>(origins: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let origins = origins
            .into_iter()
            .map(|o| {
                let o = o.as_ref().trim();
                if o.is_empty() || o.contains(',') || o.chars().any(char::is_whitespace) {
                    return Err(Error::caveat(format!("invalid origin {o:?}")));
                }
                Ok(o.to_owned())
            })
            .collect::<Result<Vec<_>, _>>()?;
        non_empty(ORIGIN, &origins)?;
        Ok(Self::Origin(origins))
    }

    /// Custom caveat with a caller-chosen kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if the kind is reserved or malformed, or
    /// the value spans lines.
    pub fn custom(kind: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
        let kind = kind.into();
        let value = value.into();
        check_kind(&kind)?;
        if RESERVED.contains(&kind.as_str()) {
            return Err(Error::caveat(format!("kind {kind:?} is reserved")));
        }
        check_single_line(&value)?;
        Ok(Self::Custom { kind, value })
    }

    /// Parses a caveat from its wire line.
    ///
    /// Built-in kinds are parsed into their typed variant; any other
    /// well-formed kind becomes [`Caveat::Custom`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if the line is not `"<kind> = <value>"`
    /// or a built-in value does not parse.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let (kind, value) = line
            .split_once(SEPARATOR)
            .ok_or_else(|| Error::caveat(format!("missing separator in {line:?}")))?;
        check_kind(kind)?;
        check_single_line(value)?;
        let caveat = match kind {
            EXPIRATION => Self::Expiration(
                value
                    .parse()
                    .map_err(|_| Error::caveat(format!("invalid expiration {value:?}")))?,
            ),
            PATH => Self::path(value)?,
            METHOD => Self::methods(value.split(','))?,
            IP => Self::ips(value.split(','))?,
            ORIGIN => Self::origins(value.split(','))?,
            PAYMENT_HASH => {
                let bytes = Base64Bytes::from(value).decode()?;
                let hash: [u8; PAYMENT_HASH_LEN] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidPaymentHash(bytes.len()))?;
                Self::PaymentHash(hash)
            }
            _ => Self::Custom {
                kind: kind.to_owned(),
                value: value.to_owned(),
            },
        };
        // Only the canonical rendering is accepted, so one caveat has one byte form.
        if caveat.to_string() != line {
            return Err(Error::caveat(format!("non-canonical caveat {line:?}")));
        }
        Ok(caveat)
    }

    /// The kind name.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Expiration(_) => EXPIRATION,
            Self::Path(_) => PATH,
            Self::Method(_) => METHOD,
            Self::Ip(_) => IP,
            Self::Origin(_) => ORIGIN,
            Self::PaymentHash(_) => PAYMENT_HASH,
            Self::Custom { kind, .. } => kind,
        }
    }

    /// The value rendered as it appears on the wire.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::Expiration(deadline) => deadline.to_string(),
            Self::Path(pattern) => pattern.clone(),
            Self::Method(methods) => methods.join(","),
            Self::Ip(ips) => ips.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
            Self::Origin(origins) => origins.join(","),
            Self::PaymentHash(hash) => Base64Bytes::encode(hash).to_string(),
            Self::Custom { value, .. } => value.clone(),
        }
    }

    /// Evaluates a built-in caveat. Returns `None` for custom kinds.
    fn evaluate_builtin(&self, ctx: &RequestContext) -> Option<bool> {
        let satisfied = match self {
            Self::Expiration(deadline) => ctx.now <= *deadline,
            Self::Path(pattern) => glob_matches(pattern, &ctx.path),
            Self::Method(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(&ctx.method)),
            Self::Ip(ips) => ctx
                .forwarded_for()
                .and_then(|ip| IpAddr::from_str(ip).ok())
                .is_some_and(|ip| ips.contains(&ip)),
            Self::Origin(origins) => ctx
                .header(ORIGIN_HEADER)
                .is_some_and(|origin| origins.iter().any(|o| o == origin)),
            // The binding is proven by the preimage check, not by the request.
            Self::PaymentHash(_) => true,
            Self::Custom { .. } => return None,
        };
        Some(satisfied)
    }
}

impl Display for Caveat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.kind(), self.value())
    }
}

impl FromStr for Caveat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn check_kind(kind: &str) -> Result<(), Error> {
    if kind.is_empty()
        || kind.contains('=')
        || kind.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::caveat(format!("invalid kind {kind:?}")));
    }
    Ok(())
}

fn check_single_line(value: &str) -> Result<(), Error> {
    if value.contains(['\n', '\r']) {
        return Err(Error::caveat("value spans multiple lines"));
    }
    Ok(())
}

fn non_empty<T>(kind: &str, values: &[T]) -> Result<(), Error> {
    if values.is_empty() {
        return Err(Error::caveat(format!("{kind} caveat needs at least one value")));
    }
    Ok(())
}

/// Matches `path` against a glob where `*` stands for any run of characters.
///
/// The pattern is anchored at both ends; every other character is literal.
#[must_use]
pub fn glob_matches(pattern: &str, path: &str) -> bool {
    glob_regex(pattern).is_ok_and(|re| re.is_match(path))
}

/// Compiles a `*` glob into an anchored [`Regex`], for callers that match often.
///
/// # Errors
///
/// Returns the regex error if the compiled pattern exceeds the size limit.
pub fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

/// The parts of an incoming request that caveats are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    now: UnixMillis,
}

impl RequestContext {
    /// Creates a context for `method` and `path`, stamped with the current time.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            now: UnixMillis::now(),
        }
    }

    /// Adds a header. Names are case-insensitive; a repeated name keeps the first value.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.as_ref().to_ascii_lowercase())
            .or_insert_with(|| value.into());
        self
    }

    /// Pins the evaluation time.
    #[must_use]
    pub const fn at(mut self, now: UnixMillis) -> Self {
        self.now = now;
        self
    }

    /// Request method as received.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, without query.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Evaluation time.
    #[must_use]
    pub const fn now(&self) -> UnixMillis {
        self.now
    }

    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The first entry of `X-Forwarded-For`, trimmed.
    #[must_use]
    pub fn forwarded_for(&self) -> Option<&str> {
        self.header(FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Predicate for a custom caveat kind, called with the caveat's value text.
pub type Predicate = Arc<dyn Fn(&RequestContext, &str) -> bool + Send + Sync>;

/// What to do with a custom caveat no predicate is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownCaveatPolicy {
    /// Treat it as satisfied.
    #[default]
    Allow,
    /// Treat it as unsatisfied.
    Deny,
}

/// Resolves caveats to evaluators and checks them against a request.
#[derive(Clone, Default)]
pub struct CaveatRegistry {
    predicates: HashMap<String, Predicate>,
    unknown: UnknownCaveatPolicy,
}

impl fmt::Debug for CaveatRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.predicates.keys().collect();
        kinds.sort();
        f.debug_struct("CaveatRegistry")
            .field("custom_kinds", &kinds)
            .field("unknown", &self.unknown)
            .finish()
    }
}

impl CaveatRegistry {
    /// Creates a registry with only the built-in kinds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy for custom kinds without a predicate.
    #[must_use]
    pub const fn with_unknown_policy(mut self, policy: UnknownCaveatPolicy) -> Self {
        self.unknown = policy;
        self
    }

    /// Registers a predicate for a custom kind, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaveat`] if `kind` is built-in or malformed.
    pub fn register<F>(&mut self, kind: impl Into<String>, predicate: F) -> Result<&mut Self, Error>
    where
        F: Fn(&RequestContext, &str) -> bool + Send + Sync + 'static,
    {
        let kind = kind.into();
        check_kind(&kind)?;
        if RESERVED.contains(&kind.as_str()) {
            return Err(Error::caveat(format!("kind {kind:?} is built in")));
        }
        self.predicates.insert(kind, Arc::new(predicate));
        Ok(self)
    }

    /// Returns the configured unknown-kind policy.
    #[must_use]
    pub const fn unknown_policy(&self) -> UnknownCaveatPolicy {
        self.unknown
    }

    /// Evaluates a single caveat.
    #[must_use]
    pub fn evaluate(&self, ctx: &RequestContext, caveat: &Caveat) -> bool {
        if let Some(satisfied) = caveat.evaluate_builtin(ctx) {
            return satisfied;
        }
        if let Some(predicate) = self.predicates.get(caveat.kind()) {
            return predicate(ctx, &caveat.value());
        }
        #[cfg(feature = "telemetry")]
        tracing::warn!(
            kind = caveat.kind(),
            policy = ?self.unknown,
            "No evaluator registered for caveat kind"
        );
        self.unknown == UnknownCaveatPolicy::Allow
    }

    /// Returns the first caveat that does not hold, if any.
    #[must_use]
    pub fn first_unsatisfied<'a>(
        &self,
        ctx: &RequestContext,
        caveats: &'a [Caveat],
    ) -> Option<&'a Caveat> {
        caveats.iter().find(|c| !self.evaluate(ctx, c))
    }

    /// `true` iff every caveat holds. An empty list always holds.
    #[must_use]
    pub fn validate_all(&self, ctx: &RequestContext, caveats: &[Caveat]) -> bool {
        self.first_unsatisfied(ctx, caveats).is_none()
    }
}
