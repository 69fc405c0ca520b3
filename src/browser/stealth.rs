//! Evasion scripts evaluated on every page after navigation.
//! Based on puppeteer-extra-plugin-stealth techniques.

use super::fingerprint::ContextProfile;

const STATIC_SCRIPTS: &[&str] = &[
    // navigator.webdriver is the first thing bot checks look at
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    r#"
    if (!window.chrome) {
        window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
    }
    "#,
    r#"
    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications' ?
            Promise.resolve({ state: Notification.permission }) :
            originalQuery(parameters)
        );
    }
    "#,
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ],
        configurable: true
    });
    "#,
    r#"
    for (const key of Object.keys(window)) {
        if (key.startsWith('cdc_')) { delete window[key]; }
    }
    "#,
    r#"
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) { return 'Intel Inc.'; }
        if (parameter === 37446) { return 'Intel Iris OpenGL Engine'; }
        return getParameter.call(this, parameter);
    };
    "#,
];

/// Scripts for a page, with `navigator.languages` matching the context locale.
pub fn stealth_scripts(profile: &ContextProfile) -> Vec<String> {
    let mut scripts: Vec<String> = STATIC_SCRIPTS.iter().map(|s| s.to_string()).collect();
    let primary = profile.locale;
    let base = primary.split('-').next().unwrap_or(primary);
    scripts.push(format!(
        r#"
    Object.defineProperty(navigator, 'languages', {{
        get: () => ['{}', '{}'],
        configurable: true
    }});
    "#,
        primary, base
    ));
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_languages_follow_locale() {
        let profile = ContextProfile::fixed("de-DE");
        let scripts = stealth_scripts(&profile);
        let lang = scripts.last().unwrap();
        assert!(lang.contains("'de-DE', 'de'"));
        assert!(scripts.iter().any(|s| s.contains("webdriver")));
    }
}
