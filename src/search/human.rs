//! Human-like input for rendered search engines.
//!
//! Cadences are planned up front from a local RNG and then played back, so
//! no RNG handle lives across an await point.

use std::ops::Range;
use std::time::Duration;

use chromiumoxide::layout::Point;
use rand::Rng;
use tracing::debug;

use crate::browser::BrowserPage;
use crate::error::ScrapeError;

/// Keys that sit next to each other on a QWERTY layout, for plausible typos.
const NEIGHBORS: &[(char, &str)] = &[
    ('a', "qwsz"),
    ('b', "vghn"),
    ('c', "xdfv"),
    ('d', "serfcx"),
    ('e', "wsdr"),
    ('f', "drtgvc"),
    ('g', "ftyhbv"),
    ('h', "gyujnb"),
    ('i', "ujko"),
    ('j', "huikmn"),
    ('k', "jiolm"),
    ('l', "kop"),
    ('m', "njk"),
    ('n', "bhjm"),
    ('o', "iklp"),
    ('p', "ol"),
    ('q', "wa"),
    ('r', "edft"),
    ('s', "awedxz"),
    ('t', "rfgy"),
    ('u', "yhji"),
    ('v', "cfgb"),
    ('w', "qase"),
    ('x', "zsdc"),
    ('y', "tghu"),
    ('z', "asx"),
];

/// One step of a typing plan.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyStep {
    Type(char, Duration),
    Backspace(Duration),
    Pause(Duration),
}

/// Typing cadence knobs.
#[derive(Debug, Clone)]
pub struct TypingStyle {
    pub key_delay_ms: Range<u64>,
    pub typo_chance: f64,
    pub think_chance: f64,
    pub think_secs: Range<f64>,
}

impl Default for TypingStyle {
    fn default() -> Self {
        Self {
            key_delay_ms: 120..280,
            typo_chance: 0.04,
            think_chance: 0.02,
            think_secs: 0.3..0.8,
        }
    }
}

fn neighbor_of(c: char, rng: &mut impl Rng) -> Option<char> {
    let lower = c.to_ascii_lowercase();
    let (_, keys) = NEIGHBORS.iter().find(|(k, _)| *k == lower)?;
    let picked = keys.chars().nth(rng.random_range(0..keys.len()))?;
    Some(if c.is_ascii_uppercase() {
        picked.to_ascii_uppercase()
    } else {
        picked
    })
}

/// Plan the keystrokes for `text`, typos and hesitations included.
pub fn plan_typing(text: &str, style: &TypingStyle, rng: &mut impl Rng) -> Vec<KeyStep> {
    let mut steps = Vec::with_capacity(text.len() * 2);
    for c in text.chars() {
        if rng.random_bool(style.typo_chance) {
            if let Some(wrong) = neighbor_of(c, rng) {
                let delay = Duration::from_millis(rng.random_range(style.key_delay_ms.clone()));
                steps.push(KeyStep::Type(wrong, delay));
                steps.push(KeyStep::Backspace(Duration::from_millis(
                    rng.random_range(100..200),
                )));
            }
        }
        let delay = Duration::from_millis(rng.random_range(style.key_delay_ms.clone()));
        steps.push(KeyStep::Type(c, delay));
        if rng.random_bool(style.think_chance) {
            steps.push(KeyStep::Pause(Duration::from_secs_f64(
                rng.random_range(style.think_secs.clone()),
            )));
        }
    }
    steps
}

/// Text produced by replaying a plan.
pub fn replay(steps: &[KeyStep]) -> String {
    let mut out = String::new();
    for step in steps {
        match step {
            KeyStep::Type(c, _) => out.push(*c),
            KeyStep::Backspace(_) => {
                out.pop();
            }
            KeyStep::Pause(_) => {}
        }
    }
    out
}

/// Sleep for a random duration in `secs`.
pub async fn pause(secs: Range<f64>) {
    let wait = rand::rng().random_range(secs);
    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
}

/// Click a field and type into it with a planned cadence.
pub async fn type_into(
    page: &BrowserPage,
    selector: &str,
    text: &str,
    style: &TypingStyle,
) -> Result<(), ScrapeError> {
    let steps = plan_typing(text, style, &mut rand::rng());
    let element = page.inner().find_element(selector).await?;
    element.click().await?;
    pause(1.0..2.0).await;

    for step in &steps {
        match step {
            KeyStep::Type(c, delay) => {
                element.type_str(c.to_string()).await?;
                tokio::time::sleep(*delay).await;
            }
            KeyStep::Backspace(delay) => {
                element.press_key("Backspace").await?;
                tokio::time::sleep(*delay).await;
            }
            KeyStep::Pause(d) => tokio::time::sleep(*d).await,
        }
    }
    debug!("Typed {} chars in {} steps", text.chars().count(), steps.len());
    Ok(())
}

/// Press Enter on the element matching `selector`.
pub async fn press_enter(page: &BrowserPage, selector: &str) -> Result<(), ScrapeError> {
    let element = page.inner().find_element(selector).await?;
    element.press_key("Enter").await?;
    Ok(())
}

/// Random pointer positions inside the page viewport.
pub fn plan_mouse_path(
    width: u32,
    height: u32,
    moves: usize,
    rng: &mut impl Rng,
) -> Vec<(f64, f64)> {
    let max_x = f64::from(width.max(100)) - 50.0;
    let max_y = f64::from(height.max(100)) - 50.0;
    (0..moves)
        .map(|_| (rng.random_range(50.0..max_x), rng.random_range(50.0..max_y)))
        .collect()
}

/// Move the pointer around, with an occasional small scroll.
pub async fn wander(page: &BrowserPage, moves: Range<usize>) {
    let viewport = page.profile().viewport;
    let (path, scrolls) = {
        let mut rng = rand::rng();
        let count = rng.random_range(moves);
        let path = plan_mouse_path(viewport.width, viewport.height, count, &mut rng);
        let scrolls: Vec<Option<u32>> = (0..count)
            .map(|_| rng.random_bool(0.3).then(|| rng.random_range(50..150)))
            .collect();
        (path, scrolls)
    };

    for ((x, y), scroll) in path.into_iter().zip(scrolls) {
        if let Err(e) = page.inner().move_mouse(Point { x, y }).await {
            debug!("Mouse move skipped: {}", e);
            return;
        }
        pause(0.3..1.2).await;
        if let Some(px) = scroll {
            scroll_by(page, px).await;
            pause(0.2..0.5).await;
        }
    }
}

pub async fn scroll_by(page: &BrowserPage, px: u32) {
    if let Err(e) = page.run_script(&format!("window.scrollBy(0, {})", px)).await {
        debug!("Scroll skipped: {}", e);
    }
}

/// Scroll through a results page the way a reader would.
pub async fn skim(page: &BrowserPage) {
    let steps: Vec<u32> = {
        let mut rng = rand::rng();
        let n = rng.random_range(3..=6);
        (0..n).map(|_| rng.random_range(300..600)).collect()
    };
    for px in steps {
        scroll_by(page, px).await;
        pause(0.5..1.5).await;
    }
}
