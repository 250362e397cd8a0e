use std::collections::HashSet;

const DEFAULT_UNIVERSE: &[&str] = &["RELIANCE.NS", "TCS.NS"];

#[derive(Debug, Clone)]
pub struct UniverseOptions {
    /// Tickers scanned when neither `--tickers` nor a watchlist supplies any.
    pub default_universe: Vec<String>,

    /// Number of ranked items kept in a scan run.
    pub top: usize,

    /// Upper bound on tickers scored per run.
    pub max_size: usize,
}

impl Default for UniverseOptions {
    fn default() -> Self {
        Self {
            default_universe: DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect(),
            top: 20,
            max_size: 500,
        }
    }
}

impl UniverseOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("SCAN_UNIVERSE") {
            let list = split_list(&s);
            if !list.is_empty() {
                out.default_universe = list;
            }
        }

        if let Ok(s) = std::env::var("SCAN_TOP") {
            if let Ok(n) = s.parse::<usize>() {
                out.top = n;
            }
        }

        if let Ok(s) = std::env::var("SCAN_MAX_UNIVERSE") {
            if let Ok(n) = s.parse::<usize>() {
                out.max_size = n;
            }
        }

        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniverseSource {
    Explicit,
    Watchlist,
    Default,
}

impl UniverseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            UniverseSource::Explicit => "explicit",
            UniverseSource::Watchlist => "watchlist",
            UniverseSource::Default => "default",
        }
    }
}

/// First non-empty of: explicit list, watchlist, configured default.
/// Blank entries and repeats are dropped, first occurrence wins.
pub fn choose_universe(
    explicit: &[String],
    watchlist: Vec<String>,
    opts: &UniverseOptions,
) -> anyhow::Result<(UniverseSource, Vec<String>)> {
    let explicit = dedup(explicit.iter().cloned());
    let (source, tickers) = if !explicit.is_empty() {
        (UniverseSource::Explicit, explicit)
    } else {
        let watchlist = dedup(watchlist);
        if !watchlist.is_empty() {
            (UniverseSource::Watchlist, watchlist)
        } else {
            (
                UniverseSource::Default,
                dedup(opts.default_universe.iter().cloned()),
            )
        }
    };

    anyhow::ensure!(!tickers.is_empty(), "scan universe is empty");
    anyhow::ensure!(
        tickers.len() <= opts.max_size,
        "scan universe has {} tickers; the limit is {}",
        tickers.len(),
        opts.max_size
    );
    Ok((source, tickers))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup(tickers: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_ascii_uppercase()))
        .collect()
}
