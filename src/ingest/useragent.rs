//! String-matching User-Agent classification.
//!
//! Produces the browser, operating system and device fields stored on every
//! processed view, plus the bot verdict that drives the `HUMANS`/`BOTS`
//! population filter.

/// Substrings (lowercase) marking automated clients.
const BOT_MARKERS: &[&str] = &[
    "bot", "crawl", "spider", "slurp", "scan", "request", "curl", "wget", "headless",
];

/// Coarse device class stored in `processed_views.device_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Pc,
    Unknown,
}

impl DeviceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "Mobile",
            Self::Tablet => "Tablet",
            Self::Pc => "PC",
            Self::Unknown => "Unknown",
        }
    }
}

/// Parsed User-Agent information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    /// Device family, e.g. `iPhone`, `Pixel 8`, `Mac`, `Other`.
    pub device: Option<String>,
    pub device_type: DeviceType,
    pub is_bot: bool,
}

/// Parse a User-Agent string into browser, OS and device components.
pub fn parse_user_agent(ua: &str) -> ParsedUserAgent {
    let is_bot = is_bot(ua);
    ParsedUserAgent {
        browser: detect_browser(ua),
        browser_version: detect_browser_version(ua),
        os: detect_os(ua),
        os_version: detect_os_version(ua),
        device: detect_device(ua, is_bot),
        device_type: detect_device_type(ua, is_bot),
        is_bot,
    }
}

/// Whether the User-Agent looks automated. A missing User-Agent counts as a bot.
pub fn is_bot(ua: &str) -> bool {
    let ua = ua.trim().to_ascii_lowercase();
    ua.is_empty() || BOT_MARKERS.iter().any(|marker| ua.contains(marker))
}

fn detect_browser(ua: &str) -> Option<String> {
    // Order matters: check more specific patterns first
    if ua.contains("Edg/") || ua.contains("Edge/") {
        Some("Edge".to_string())
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        Some("Opera".to_string())
    } else if ua.contains("Chrome/") && !ua.contains("Chromium/") {
        Some("Chrome".to_string())
    } else if ua.contains("Safari/") && !ua.contains("Chrome/") {
        Some("Safari".to_string())
    } else if ua.contains("Firefox/") {
        Some("Firefox".to_string())
    } else {
        None
    }
}

fn detect_browser_version(ua: &str) -> Option<String> {
    ["Edg/", "Edge/", "OPR/", "Chrome/", "Firefox/", "Version/"]
        .iter()
        .find_map(|prefix| extract_version_after(ua, prefix))
}

fn detect_os(ua: &str) -> Option<String> {
    if ua.contains("Windows") {
        Some("Windows".to_string())
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        // iPhone UAs also contain "Mac OS X"
        Some("iOS".to_string())
    } else if ua.contains("Mac OS X") || ua.contains("macOS") {
        Some("macOS".to_string())
    } else if ua.contains("Android") {
        Some("Android".to_string())
    } else if ua.contains("CrOS") {
        Some("Chrome OS".to_string())
    } else if ua.contains("Linux") {
        Some("Linux".to_string())
    } else {
        None
    }
}

fn detect_os_version(ua: &str) -> Option<String> {
    if ua.contains("Windows NT") {
        extract_version_after(ua, "Windows NT ")
    } else if ua.contains("iPhone OS") {
        extract_version_after(ua, "iPhone OS ").map(|v| v.replace('_', "."))
    } else if ua.contains("CPU OS") {
        extract_version_after(ua, "CPU OS ").map(|v| v.replace('_', "."))
    } else if ua.contains("Mac OS X") {
        extract_version_after(ua, "Mac OS X ").map(|v| v.replace('_', "."))
    } else if ua.contains("Android") {
        extract_version_after(ua, "Android ")
    } else {
        None
    }
}

fn detect_device(ua: &str, is_bot: bool) -> Option<String> {
    if is_bot {
        return Some("Spider".to_string());
    }
    for family in ["iPhone", "iPad", "iPod"] {
        if ua.contains(family) {
            return Some(family.to_string());
        }
    }
    if ua.contains("Android") {
        return Some(android_model(ua).unwrap_or_else(|| "Generic Android".to_string()));
    }
    if ua.contains("Macintosh") {
        return Some("Mac".to_string());
    }
    if ua.is_empty() {
        None
    } else {
        Some("Other".to_string())
    }
}

/// Model name from the platform segment, e.g. `(Linux; Android 14; Pixel 8)`.
fn android_model(ua: &str) -> Option<String> {
    let start = ua.find('(')? + 1;
    let end = start + ua[start..].find(')')?;
    ua[start..end]
        .split(';')
        .map(str::trim)
        .skip_while(|part| !part.starts_with("Android"))
        .nth(1)
        .map(|model| model.split(" Build/").next().unwrap_or(model).trim())
        .filter(|model| !model.is_empty() && *model != "wv" && *model != "K")
        .map(String::from)
}

fn detect_device_type(ua: &str, is_bot: bool) -> DeviceType {
    if is_bot {
        DeviceType::Unknown
    } else if ua.contains("iPad")
        || ua.contains("Tablet")
        || (ua.contains("Android") && !ua.contains("Mobile"))
    {
        DeviceType::Tablet
    } else if ua.contains("iPhone")
        || ua.contains("iPod")
        || ua.contains("Windows Phone")
        || ua.contains("Mobile")
    {
        DeviceType::Mobile
    } else if ua.contains("Windows")
        || ua.contains("Macintosh")
        || ua.contains("X11")
        || ua.contains("CrOS")
        || ua.contains("Linux")
    {
        DeviceType::Pc
    } else {
        DeviceType::Unknown
    }
}

fn extract_version_after(ua: &str, prefix: &str) -> Option<String> {
    let pos = ua.find(prefix)?;
    let start = pos + prefix.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .collect();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.130 Safari/537.36";
    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36";
    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
    const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

    #[test]
    fn test_parse_chrome_windows() {
        let parsed = parse_user_agent(CHROME_WINDOWS);
        assert_eq!(parsed.browser.as_deref(), Some("Chrome"));
        assert_eq!(parsed.browser_version.as_deref(), Some("120.0.6099.130"));
        assert_eq!(parsed.os.as_deref(), Some("Windows"));
        assert_eq!(parsed.os_version.as_deref(), Some("10.0"));
        assert_eq!(parsed.device.as_deref(), Some("Other"));
        assert_eq!(parsed.device_type, DeviceType::Pc);
        assert!(!parsed.is_bot);
    }

    #[test]
    fn test_parse_firefox_linux() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
        let parsed = parse_user_agent(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Firefox"));
        assert_eq!(parsed.browser_version.as_deref(), Some("121.0"));
        assert_eq!(parsed.os.as_deref(), Some("Linux"));
        assert_eq!(parsed.device_type, DeviceType::Pc);
    }

    #[test]
    fn test_parse_safari_macos() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15";
        let parsed = parse_user_agent(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Safari"));
        assert_eq!(parsed.browser_version.as_deref(), Some("17.2"));
        assert_eq!(parsed.os.as_deref(), Some("macOS"));
        assert_eq!(parsed.os_version.as_deref(), Some("10.15.7"));
        assert_eq!(parsed.device.as_deref(), Some("Mac"));
    }

    #[test]
    fn test_parse_edge() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
        let parsed = parse_user_agent(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Edge"));
        assert_eq!(parsed.browser_version.as_deref(), Some("120.0.2210.91"));
    }

    #[test]
    fn test_parse_android_phone() {
        let parsed = parse_user_agent(PIXEL);
        assert_eq!(parsed.os.as_deref(), Some("Android"));
        assert_eq!(parsed.os_version.as_deref(), Some("14"));
        assert_eq!(parsed.device.as_deref(), Some("Pixel 8"));
        assert_eq!(parsed.device_type, DeviceType::Mobile);
    }

    #[test]
    fn test_parse_android_tablet() {
        let ua = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
        let parsed = parse_user_agent(ua);
        assert_eq!(parsed.device.as_deref(), Some("SM-X700"));
        assert_eq!(parsed.device_type, DeviceType::Tablet);
    }

    #[test]
    fn test_parse_iphone() {
        let parsed = parse_user_agent(IPHONE);
        assert_eq!(parsed.browser.as_deref(), Some("Safari"));
        assert_eq!(parsed.os.as_deref(), Some("iOS"));
        assert_eq!(parsed.os_version.as_deref(), Some("17.2.1"));
        assert_eq!(parsed.device.as_deref(), Some("iPhone"));
        assert_eq!(parsed.device_type, DeviceType::Mobile);
    }

    #[test]
    fn test_parse_ipad_is_tablet() {
        let parsed = parse_user_agent(IPAD);
        assert_eq!(parsed.os_version.as_deref(), Some("16.6"));
        assert_eq!(parsed.device.as_deref(), Some("iPad"));
        assert_eq!(parsed.device_type, DeviceType::Tablet);
    }

    #[test]
    fn test_bot_markers() {
        assert!(is_bot(GOOGLEBOT));
        assert!(is_bot("curl/8.4.0"));
        assert!(is_bot("Wget/1.21"));
        assert!(is_bot("python-requests/2.31"));
        assert!(is_bot("Mozilla/5.0 (compatible; Yahoo! Slurp)"));
        assert!(is_bot("Mozilla/5.0 HeadlessChrome/120.0"));
        assert!(is_bot("Baiduspider"));
        assert!(is_bot("masscan/1.3"));
        assert!(!is_bot(CHROME_WINDOWS));
        assert!(!is_bot(IPHONE));
    }

    #[test]
    fn test_empty_ua_is_bot() {
        let parsed = parse_user_agent("");
        assert!(parsed.is_bot);
        assert!(parsed.browser.is_none());
        assert!(parsed.os.is_none());
        assert!(is_bot("   "));
    }

    #[test]
    fn test_bot_device_classification() {
        let parsed = parse_user_agent(GOOGLEBOT);
        assert!(parsed.is_bot);
        assert_eq!(parsed.device.as_deref(), Some("Spider"));
        assert_eq!(parsed.device_type, DeviceType::Unknown);
        assert_eq!(DeviceType::Unknown.as_str(), "Unknown");
        assert_eq!(DeviceType::Pc.as_str(), "PC");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Parsing never panics, and any UA carrying a bot marker is a bot.
        #[test]
        fn prop_marker_implies_bot(
            prefix in "[ -~]{0,40}",
            marker in proptest::sample::select(BOT_MARKERS),
            suffix in "[ -~]{0,40}",
        ) {
            let ua = format!("{prefix}{}{suffix}", marker.to_uppercase());
            let parsed = parse_user_agent(&ua);
            prop_assert!(parsed.is_bot);
            prop_assert_eq!(parsed.device_type, DeviceType::Unknown);
        }

        #[test]
        fn prop_parse_total(ua in "\\PC{0,200}") {
            let _ = parse_user_agent(&ua);
        }
    }
}
