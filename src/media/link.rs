use std::fmt;
use url::Url;

/// Origin network of a submitted link, used for captions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    YouTube,
    Instagram,
    TikTok,
    Facebook,
    Twitter,
    Vk,
    Reddit,
    Vimeo,
    Dailymotion,
    Likee,
    Pinterest,
    Generic,
}

const NETWORK_DOMAINS: &[(&str, Network)] = &[
    ("youtube.com", Network::YouTube),
    ("youtu.be", Network::YouTube),
    ("instagram.com", Network::Instagram),
    ("tiktok.com", Network::TikTok),
    ("facebook.com", Network::Facebook),
    ("fb.watch", Network::Facebook),
    ("twitter.com", Network::Twitter),
    ("x.com", Network::Twitter),
    ("vk.com", Network::Vk),
    ("reddit.com", Network::Reddit),
    ("vimeo.com", Network::Vimeo),
    ("dailymotion.com", Network::Dailymotion),
    ("likee.video", Network::Likee),
    ("pinterest.com", Network::Pinterest),
];

impl Network {
    pub fn from_url(url: &Url) -> Self {
        let Some(host) = url.host_str() else {
            return Network::Generic;
        };
        let host = host.to_lowercase();

        NETWORK_DOMAINS
            .iter()
            .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
            .map(|(_, network)| *network)
            .unwrap_or(Network::Generic)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::YouTube => "YouTube",
            Network::Instagram => "Instagram",
            Network::TikTok => "TikTok",
            Network::Facebook => "Facebook",
            Network::Twitter => "Twitter",
            Network::Vk => "VK",
            Network::Reddit => "Reddit",
            Network::Vimeo => "Vimeo",
            Network::Dailymotion => "Dailymotion",
            Network::Likee => "Likee",
            Network::Pinterest => "Pinterest",
            Network::Generic => "Video",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated http(s) URL pulled out of user text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    url: Url,
    network: Network,
}

impl SourceLink {
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }
        let network = Network::from_url(&url);
        Some(Self { url, network })
    }

    /// Returns the first usable link in free-form text, if any.
    pub fn extract(text: &str) -> Option<Self> {
        text.split_whitespace()
            .filter_map(|word| {
                let lower = word.to_ascii_lowercase();
                let start = lower
                    .find("https://")
                    .or_else(|| lower.find("http://"))?;
                let candidate = word[start..]
                    .trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ')' | ']' | '>' | '"' | '\'' | ';' | ':'));
                Self::parse(candidate)
            })
            .next()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn caption(&self) -> String {
        match self.network {
            Network::Generic => "Video".to_string(),
            network => format!("{} video", network),
        }
    }
}

impl fmt::Display for SourceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
