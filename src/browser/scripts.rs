//! Page scripts evaluated through the debugging protocol.
//!
//! Scripts that return structured data serialize it with `JSON.stringify` so
//! the Rust side only ever receives a string.

/// Popups, consent banners and ads that block playback
pub const OVERLAY_SELECTORS: &[&str] = &[
    // consent banners
    "button[aria-label*='Accept']",
    "button[aria-label*='Accept all']",
    "button[aria-label*='Aceptar']",
    "ytd-consent-bump-v2-lightbox button",
    // close buttons
    "button[aria-label*='Close']",
    "button[aria-label*='Dismiss']",
    "button[aria-label*='Cerrar']",
    "button.close-button",
    "button.dismiss-button",
    // sign-in nags
    "ytd-modal-with-title-and-button-renderer button",
    "#dismiss-button",
    "button[aria-label*='No thanks']",
    "button[aria-label*='Not now']",
    // premium offers
    "ytd-mealbar-promo-renderer button",
    // skippable ads
    "button.ytp-ad-skip-button",
    "button.ytp-ad-skip-button-modern",
    ".ytp-skip-ad-button",
    "button[aria-label*='Skip']",
    // ad overlays
    ".ytp-ad-overlay-close-button",
    ".ytp-ad-overlay-close-container",
];

/// Title sources, most specific first
pub const TITLE_SELECTORS: &[&str] = &[
    "h1.ytd-watch-metadata yt-formatted-string",
    "h1.style-scope.ytd-watch-metadata",
    "h1.ytd-video-primary-info-renderer",
    "ytd-watch-metadata h1",
];

pub const READY_STATE: &str = "document.readyState";

pub const DURATION_TEXT: &str = r#"
(() => {
    const el = document.querySelector('.ytp-time-duration');
    return el ? (el.textContent || '').trim() : '';
})()
"#;

pub const EXIT_FULLSCREEN: &str = r#"
(() => {
    if (!document.fullscreenElement) return false;
    document.exitFullscreen().catch(() => {});
    return true;
})()
"#;

pub const ENTER_FULLSCREEN: &str = r#"
(() => {
    if (document.fullscreenElement) return true;
    const button = document.querySelector('.ytp-fullscreen-button');
    if (button) { button.click(); return true; }
    const player = document.querySelector('#movie_player') || document.querySelector('video');
    if (!player || !player.requestFullscreen) return false;
    player.requestFullscreen().catch(() => {});
    return true;
})()
"#;

pub const PLAY: &str = r#"
(() => {
    const video = document.querySelector('video');
    if (!video) return false;
    if (video.paused) {
        video.play().catch(() => {});
        const button = document.querySelector('.ytp-play-button');
        const label = button ? (button.getAttribute('aria-label') || '').toLowerCase() : '';
        if (button && video.paused && (label.includes('play') || label.includes('reproducir'))) {
            button.click();
        }
    }
    return true;
})()
"#;

/// Title from the watch page heading, falling back to the document title
pub fn video_title() -> String {
    format!(
        r#"
(() => {{
    const selectors = {selectors};
    for (const selector of selectors) {{
        const el = document.querySelector(selector);
        const text = el ? (el.textContent || '').trim() : '';
        if (text) return text;
    }}
    return (document.title || '').replace(/\s*-\s*YouTube\s*$/, '').trim();
}})()
"#,
        selectors = js_array(TITLE_SELECTORS)
    )
}

/// Snapshot of the first media element plus overlay visibility
pub fn playback_state() -> String {
    format!(
        r#"
(() => {{
    const selectors = {selectors};
    const visible = (el) => el && el.offsetParent !== null;
    const overlayPresent = selectors.some((s) => Array.from(document.querySelectorAll(s)).some(visible))
        || !!document.querySelector('.ad-showing');
    const video = document.querySelector('video');
    if (!video) {{
        return JSON.stringify({{ hasMedia: false, overlayPresent }});
    }}
    const duration = Number.isFinite(video.duration) ? video.duration : null;
    return JSON.stringify({{
        hasMedia: true,
        position: video.currentTime || 0,
        duration,
        paused: video.paused,
        ended: video.ended,
        readyState: video.readyState,
        overlayPresent,
        error: video.error ? ('media error ' + video.error.code + (video.error.message ? ': ' + video.error.message : '')) : null,
    }});
}})()
"#,
        selectors = js_array(OVERLAY_SELECTORS)
    )
}

/// Click every visible overlay control, returning the number of clicks
pub fn dismiss_overlays() -> String {
    format!(
        r#"
(() => {{
    const selectors = {selectors};
    let closed = 0;
    for (const selector of selectors) {{
        for (const el of document.querySelectorAll(selector)) {{
            if (el.offsetParent === null) continue;
            try {{ el.click(); closed += 1; }} catch (e) {{}}
        }}
    }}
    return closed;
}})()
"#,
        selectors = js_array(OVERLAY_SELECTORS)
    )
}

fn js_array(items: &[&str]) -> String {
    // JSON string literals are valid JavaScript
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors_are_embedded_as_js_strings() {
        let script = dismiss_overlays();
        assert!(script.contains(r#""button[aria-label*='Skip']""#));
        assert!(script.contains(r##""#dismiss-button""##));
    }

    #[test]
    fn test_playback_script_reports_json() {
        let script = playback_state();
        assert!(script.contains("JSON.stringify"));
        assert!(script.contains("overlayPresent"));
        assert!(!script.contains("{{"));
    }
}
