/// Which of the four `Privatemode-Version`-gated chat/completions behaviors
/// (§4.5) an inbound request falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatBranch {
    /// No `Privatemode-Version` header at all: selective-JSON compatibility
    /// mode for clients that predate the header.
    VersionAbsent,
    /// `< 1.16.0`: full-JSON, with the `[DONE]` event-stream sentinel itself
    /// mutated too (a since-retired client quirk).
    Legacy,
    /// `< 1.17.0`: full-JSON, `[DONE]` passes through unmutated.
    Intermediate,
    /// `>= 1.17.0`: as `Intermediate`, plus `cache_salt` must be at least 32
    /// characters.
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SemVer(u64, u64, u64);

impl SemVer {
    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches(['v', 'V']);
        let mut parts = trimmed.splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(SemVer(major, minor, patch))
    }
}

const V1_16_0: SemVer = SemVer(1, 16, 0);
const V1_17_0: SemVer = SemVer(1, 17, 0);

/// Classify a `Privatemode-Version` header value into the branch its chat
/// adapter should run. An unparseable (but present) header is treated as
/// `Legacy`: the oldest, most conservative behavior.
pub fn classify(header: Option<&str>) -> ChatBranch {
    let Some(raw) = header else {
        return ChatBranch::VersionAbsent;
    };
    let version = match SemVer::parse(raw) {
        Some(v) => v,
        None => return ChatBranch::Legacy,
    };
    if version < V1_16_0 {
        ChatBranch::Legacy
    } else if version < V1_17_0 {
        ChatBranch::Intermediate
    } else {
        ChatBranch::Current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_header_is_version_absent() {
        assert_eq!(classify(None), ChatBranch::VersionAbsent);
    }

    #[test]
    fn pre_1_16_is_legacy() {
        assert_eq!(classify(Some("1.15.9")), ChatBranch::Legacy);
    }

    #[test]
    fn between_1_16_and_1_17_is_intermediate() {
        assert_eq!(classify(Some("1.16.0")), ChatBranch::Intermediate);
        assert_eq!(classify(Some("1.16.4")), ChatBranch::Intermediate);
    }

    #[test]
    fn at_or_above_1_17_is_current() {
        assert_eq!(classify(Some("1.17.0")), ChatBranch::Current);
        assert_eq!(classify(Some("2.0.0")), ChatBranch::Current);
    }

    #[test]
    fn leading_v_is_tolerated() {
        assert_eq!(classify(Some("v1.17.0")), ChatBranch::Current);
    }

    #[test]
    fn garbage_header_falls_back_to_legacy() {
        assert_eq!(classify(Some("not-a-version")), ChatBranch::Legacy);
    }
}
