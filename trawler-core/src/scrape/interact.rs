//! Interaction strategies that coax a list page into revealing its items.
//!
//! Strategies run against the [`ListSurface`] trait; the browser-backed
//! implementation lives in [`CdpSurface`], and tests drive the state
//! machines with scripted fakes. Items already handed out are marked with a
//! `data-harvested` attribute so repeated collection passes stay
//! incremental, and the markers are cleared before the page is released.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::page::Page;
use rand::Rng;
use tracing::{debug, warn};

use crate::browser::error::{BrowserError, BrowserResult};
use crate::browser::page::js_string;
use crate::config::ScrapingSection;
use crate::model::{InteractionConfig, InteractionStrategy};

const MIN_SETTLE: Duration = Duration::from_millis(200);
const BOTTOM_BUFFER_PX: u32 = 100;
const DEFAULT_MAX_SCROLLS: u32 = 20;
const DEFAULT_MAX_CLICKS: u32 = 5;
const DEFAULT_CLICK_DELAY_MS: u64 = 1500;

#[async_trait]
pub trait ListSurface: Send + Sync {
    /// Returns the outer HTML of items matching `selector` that have not
    /// been collected yet, marking them as collected.
    async fn collect_new_items(&self, selector: &str) -> BrowserResult<Vec<String>>;

    /// Scrolls the viewport down by roughly one screen.
    async fn scroll_page(&self) -> BrowserResult<()>;

    /// Whether the viewport sits within the bottom buffer of the document.
    async fn at_bottom(&self) -> BrowserResult<bool>;

    /// Whether an element matching `selector` exists and intersects the
    /// viewport.
    async fn is_visible(&self, selector: &str) -> BrowserResult<bool>;

    async fn click(&self, selector: &str) -> BrowserResult<()>;

    /// Total number of elements currently matching `selector`.
    async fn count_items(&self, selector: &str) -> BrowserResult<usize>;

    /// Current document scroll height.
    async fn page_height(&self) -> BrowserResult<u64>;

    /// Removes the collected markers so a later visit starts fresh.
    async fn clear_markers(&self) -> BrowserResult<()>;
}

/// Interaction options with configuration defaults already applied.
#[derive(Debug, Clone)]
pub struct ResolvedInteraction {
    pub strategy: InteractionStrategy,
    pub scroll_delay: Duration,
    pub content_load_wait: Duration,
    pub max_empty_scrolls: u32,
    pub max_scrolls: u32,
    pub load_more_selector: Option<String>,
    pub max_clicks: u32,
    pub click_delay: Duration,
    pub stagnation_timeout: Duration,
    pub max_items: Option<usize>,
}

impl ResolvedInteraction {
    pub fn resolve(config: &InteractionConfig, defaults: &ScrapingSection) -> Self {
        Self {
            strategy: config.strategy,
            scroll_delay: Duration::from_millis(
                config
                    .scroll_delay_ms
                    .unwrap_or(defaults.default_scroll_delay_ms),
            ),
            content_load_wait: Duration::from_millis(
                config
                    .content_load_wait_ms
                    .unwrap_or(defaults.default_content_load_wait_ms),
            ),
            max_empty_scrolls: config
                .max_empty_scrolls
                .unwrap_or(defaults.default_max_empty_scrolls),
            max_scrolls: config.max_scrolls.unwrap_or(DEFAULT_MAX_SCROLLS),
            load_more_selector: config.load_more_selector.clone(),
            max_clicks: config.max_clicks.unwrap_or(DEFAULT_MAX_CLICKS),
            click_delay: Duration::from_millis(
                config.click_delay_ms.unwrap_or(DEFAULT_CLICK_DELAY_MS),
            ),
            stagnation_timeout: Duration::from_millis(
                config
                    .stagnation_timeout_ms
                    .unwrap_or(defaults.default_stagnation_timeout_ms),
            ),
            max_items: config.max_items,
        }
    }

    /// How many consecutive unchanged-height scrolls count as a stagnated
    /// page while searching for the load-more button.
    fn required_stable_count(&self) -> u32 {
        let delay_ms = self.scroll_delay.as_millis().max(1) as u64;
        let timeout_ms = self.stagnation_timeout.as_millis() as u64;
        (timeout_ms.div_ceil(delay_ms) as u32).max(1)
    }

    fn capped(&self, items: Vec<String>) -> Vec<String> {
        match self.max_items {
            Some(cap) if items.len() > cap => {
                let mut items = items;
                items.truncate(cap);
                items
            }
            _ => items,
        }
    }

    fn cap_reached(&self, collected: usize) -> bool {
        self.max_items.is_some_and(|cap| collected >= cap)
    }
}

/// Runs the configured strategy to completion and returns the collected
/// item fragments, oldest first.
pub async fn collect_items<S: ListSurface + ?Sized>(
    surface: &S,
    item_selector: &str,
    options: &ResolvedInteraction,
) -> BrowserResult<Vec<String>> {
    let items = match options.strategy {
        InteractionStrategy::None => surface.collect_new_items(item_selector).await?,
        InteractionStrategy::InfiniteScroll => {
            infinite_scroll(surface, item_selector, options).await?
        }
        InteractionStrategy::FixedScrolls => fixed_scrolls(surface, item_selector, options).await?,
        InteractionStrategy::LoadMoreButton => {
            load_more_button(surface, item_selector, options).await?
        }
    };
    if let Err(err) = surface.clear_markers().await {
        warn!(error = %err, "failed to clear collection markers");
    }
    Ok(options.capped(items))
}

async fn infinite_scroll<S: ListSurface + ?Sized>(
    surface: &S,
    item_selector: &str,
    options: &ResolvedInteraction,
) -> BrowserResult<Vec<String>> {
    let mut items = surface.collect_new_items(item_selector).await?;
    let mut consecutive_empty = 0u32;

    for scroll in 0..options.max_scrolls {
        if options.cap_reached(items.len()) {
            break;
        }
        surface.scroll_page().await?;
        tokio::time::sleep(settle_delay(options.scroll_delay)).await;
        tokio::time::sleep(options.content_load_wait).await;

        let fresh = surface.collect_new_items(item_selector).await?;
        if fresh.is_empty() {
            consecutive_empty += 1;
            debug!(scroll, consecutive_empty, "scroll produced no new items");
            if consecutive_empty >= options.max_empty_scrolls {
                break;
            }
        } else {
            consecutive_empty = 0;
            items.extend(fresh);
        }

        if options.cap_reached(items.len()) {
            break;
        }

        if surface.at_bottom().await? {
            // The bottom scroll may still trigger a late load; only stop
            // once a final pass down here comes back empty.
            tokio::time::sleep(options.content_load_wait).await;
            let trailing = surface.collect_new_items(item_selector).await?;
            if trailing.is_empty() {
                debug!(scroll, "reached page bottom with no trailing items");
                break;
            }
            items.extend(trailing);
        }
    }
    Ok(items)
}

async fn fixed_scrolls<S: ListSurface + ?Sized>(
    surface: &S,
    item_selector: &str,
    options: &ResolvedInteraction,
) -> BrowserResult<Vec<String>> {
    let mut items = surface.collect_new_items(item_selector).await?;
    for _ in 0..options.max_scrolls {
        if options.cap_reached(items.len()) {
            break;
        }
        surface.scroll_page().await?;
        tokio::time::sleep(settle_delay(options.scroll_delay)).await;
        items.extend(surface.collect_new_items(item_selector).await?);
    }
    Ok(items)
}

async fn load_more_button<S: ListSurface + ?Sized>(
    surface: &S,
    item_selector: &str,
    options: &ResolvedInteraction,
) -> BrowserResult<Vec<String>> {
    let selector = options
        .load_more_selector
        .as_deref()
        .ok_or_else(|| BrowserError::Configuration("load_more_selector missing".to_string()))?;
    let required_stable = options.required_stable_count();
    let mut items = surface.collect_new_items(item_selector).await?;

    for attempt in 0..options.max_clicks {
        if options.cap_reached(items.len()) {
            break;
        }
        let before = surface.count_items(item_selector).await?;

        // Scroll-search cycle: bring the button into view, giving up once
        // the page height stagnates or the safety scroll cap is hit.
        let mut found = surface.is_visible(selector).await?;
        let mut stable = 0u32;
        let mut scrolls = 0u32;
        while !found && scrolls < options.max_scrolls {
            let last_height = surface.page_height().await?;
            surface.scroll_page().await?;
            scrolls += 1;
            tokio::time::sleep(options.scroll_delay).await;
            if surface.page_height().await? == last_height {
                stable += 1;
                if stable >= required_stable {
                    debug!(attempt, scrolls, "page height stagnated during button search");
                    break;
                }
            } else {
                stable = 0;
            }
            found = surface.is_visible(selector).await?;
        }
        // The height can settle in the same beat the button renders.
        if !found && !surface.is_visible(selector).await? {
            debug!(selector, attempt, "load-more button not visible, stopping");
            break;
        }

        if let Err(err) = surface.click(selector).await {
            // The button disappearing or going stale means no more content.
            debug!(selector, error = %err, "load-more click failed, treating as end of content");
            break;
        }
        tokio::time::sleep(options.click_delay).await;

        items.extend(surface.collect_new_items(item_selector).await?);
        let after = surface.count_items(item_selector).await?;
        if after <= before {
            debug!(attempt, count = after, "click did not grow the list, stopping");
            break;
        }
    }
    Ok(items)
}

/// Randomized settle delay in `[0.5x, 1.5x]` of the configured scroll
/// delay, with a floor so pages still get a beat to render.
fn settle_delay(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let low = (base_ms / 2).max(MIN_SETTLE.as_millis() as u64);
    let high = (base_ms.saturating_mul(3) / 2).max(low + 1);
    let ms = rand::thread_rng().gen_range(low..high);
    Duration::from_millis(ms)
}

/// [`ListSurface`] over a live CDP page. Snippets are fixed function
/// templates taking the selector as a JSON-encoded argument.
pub struct CdpSurface<'a> {
    page: &'a Page,
}

impl<'a> CdpSurface<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> BrowserResult<T> {
        self.page
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("unexpected evaluation result: {err}")))
    }
}

#[async_trait]
impl ListSurface for CdpSurface<'_> {
    async fn collect_new_items(&self, selector: &str) -> BrowserResult<Vec<String>> {
        let script = format!(
            "((sel) => {{\n\
                 const out = [];\n\
                 document.querySelectorAll(sel).forEach((el) => {{\n\
                     if (!el.hasAttribute('data-harvested')) {{\n\
                         el.setAttribute('data-harvested', '1');\n\
                         out.push(el.outerHTML);\n\
                     }}\n\
                 }});\n\
                 return out;\n\
             }})({})",
            js_string(selector)
        );
        self.eval(script).await
    }

    async fn scroll_page(&self) -> BrowserResult<()> {
        // A few uneven bursts rather than one jump.
        let bursts = rand::thread_rng().gen_range(2..=4);
        for _ in 0..bursts {
            let px = rand::thread_rng().gen_range(300..=700);
            let script = format!("(() => {{ window.scrollBy(0, {px}); }})()");
            self.page.evaluate(script.as_str()).await?;
            let pause = rand::thread_rng().gen_range(50..=150);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
        Ok(())
    }

    async fn at_bottom(&self) -> BrowserResult<bool> {
        let script = format!(
            "(() => (window.innerHeight + window.scrollY) >= (document.body.scrollHeight - {BOTTOM_BUFFER_PX}))()"
        );
        self.eval(script).await
    }

    async fn is_visible(&self, selector: &str) -> BrowserResult<bool> {
        let script = format!(
            "((sel) => {{\n\
                 const el = document.querySelector(sel);\n\
                 if (!el) return false;\n\
                 const rect = el.getBoundingClientRect();\n\
                 return rect.bottom > 0 && rect.right > 0\n\
                     && rect.top < window.innerHeight && rect.left < window.innerWidth;\n\
             }})({})",
            js_string(selector)
        );
        self.eval(script).await
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        let element = self.page.find_element(selector.to_string()).await?;
        element.click().await?;
        Ok(())
    }

    async fn count_items(&self, selector: &str) -> BrowserResult<usize> {
        let script = format!(
            "((sel) => document.querySelectorAll(sel).length)({})",
            js_string(selector)
        );
        let count: u64 = self.eval(script).await?;
        Ok(count as usize)
    }

    async fn page_height(&self) -> BrowserResult<u64> {
        let script = "(() => document.body.scrollHeight)()".to_string();
        self.eval(script).await
    }

    async fn clear_markers(&self) -> BrowserResult<()> {
        let script = "(() => { document.querySelectorAll('[data-harvested]').forEach((el) => el.removeAttribute('data-harvested')); })()";
        self.page.evaluate(script).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted surface: each scroll reveals the next batch from `waves`;
    /// `bottom_waves` are released one per at-bottom check, modeling lazy
    /// loads triggered by hitting the end of the document.
    struct FakeSurface {
        state: Mutex<FakeState>,
        fail_click_after: Option<usize>,
        button_visible: bool,
    }

    struct FakeState {
        waves: Vec<Vec<String>>,
        bottom_waves: Vec<Vec<String>>,
        revealed: Vec<String>,
        collected: usize,
        clicks: usize,
        scrolls: usize,
        cleared: bool,
    }

    impl FakeSurface {
        fn new(initial: Vec<&str>, waves: Vec<Vec<&str>>) -> Self {
            Self {
                state: Mutex::new(FakeState {
                    waves: script(waves),
                    bottom_waves: Vec::new(),
                    revealed: initial.into_iter().map(str::to_string).collect(),
                    collected: 0,
                    clicks: 0,
                    scrolls: 0,
                    cleared: false,
                }),
                fail_click_after: None,
                button_visible: true,
            }
        }

        fn with_bottom_waves(self, waves: Vec<Vec<&str>>) -> Self {
            self.state.lock().unwrap().bottom_waves = script(waves);
            self
        }

        fn reveal_next(state: &mut FakeState) {
            if !state.waves.is_empty() {
                let wave = state.waves.remove(0);
                state.revealed.extend(wave);
            }
        }
    }

    fn script(waves: Vec<Vec<&str>>) -> Vec<Vec<String>> {
        waves
            .into_iter()
            .map(|wave| wave.into_iter().map(str::to_string).collect())
            .collect()
    }

    #[async_trait]
    impl ListSurface for FakeSurface {
        async fn collect_new_items(&self, _selector: &str) -> BrowserResult<Vec<String>> {
            let mut state = self.state.lock().unwrap();
            let fresh = state.revealed[state.collected..].to_vec();
            state.collected = state.revealed.len();
            Ok(fresh)
        }

        async fn scroll_page(&self) -> BrowserResult<()> {
            let mut state = self.state.lock().unwrap();
            state.scrolls += 1;
            Self::reveal_next(&mut state);
            Ok(())
        }

        async fn at_bottom(&self) -> BrowserResult<bool> {
            let mut state = self.state.lock().unwrap();
            if state.waves.is_empty() {
                if !state.bottom_waves.is_empty() {
                    let wave = state.bottom_waves.remove(0);
                    state.revealed.extend(wave);
                }
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn is_visible(&self, _selector: &str) -> BrowserResult<bool> {
            Ok(self.button_visible)
        }

        async fn click(&self, _selector: &str) -> BrowserResult<()> {
            let mut state = self.state.lock().unwrap();
            state.clicks += 1;
            if let Some(limit) = self.fail_click_after {
                if state.clicks > limit {
                    return Err(BrowserError::Unexpected("button gone".to_string()));
                }
            }
            Self::reveal_next(&mut state);
            Ok(())
        }

        async fn count_items(&self, _selector: &str) -> BrowserResult<usize> {
            Ok(self.state.lock().unwrap().revealed.len())
        }

        async fn page_height(&self) -> BrowserResult<u64> {
            // Pages grow as content loads.
            Ok(100 + self.state.lock().unwrap().revealed.len() as u64)
        }

        async fn clear_markers(&self) -> BrowserResult<()> {
            self.state.lock().unwrap().cleared = true;
            Ok(())
        }
    }

    /// Delegating wrapper that never reports the bottom of the page.
    struct NeverBottom(FakeSurface);

    #[async_trait]
    impl ListSurface for NeverBottom {
        async fn collect_new_items(&self, selector: &str) -> BrowserResult<Vec<String>> {
            self.0.collect_new_items(selector).await
        }
        async fn scroll_page(&self) -> BrowserResult<()> {
            self.0.scroll_page().await
        }
        async fn at_bottom(&self) -> BrowserResult<bool> {
            Ok(false)
        }
        async fn is_visible(&self, selector: &str) -> BrowserResult<bool> {
            self.0.is_visible(selector).await
        }
        async fn click(&self, selector: &str) -> BrowserResult<()> {
            self.0.click(selector).await
        }
        async fn count_items(&self, selector: &str) -> BrowserResult<usize> {
            self.0.count_items(selector).await
        }
        async fn page_height(&self) -> BrowserResult<u64> {
            self.0.page_height().await
        }
        async fn clear_markers(&self) -> BrowserResult<()> {
            self.0.clear_markers().await
        }
    }

    fn options(strategy: InteractionStrategy) -> ResolvedInteraction {
        ResolvedInteraction {
            strategy,
            scroll_delay: Duration::from_millis(1),
            content_load_wait: Duration::from_millis(1),
            max_empty_scrolls: 2,
            max_scrolls: 20,
            load_more_selector: Some("button.more".to_string()),
            max_clicks: 5,
            click_delay: Duration::from_millis(1),
            stagnation_timeout: Duration::from_millis(2),
            max_items: None,
        }
    }

    #[tokio::test]
    async fn infinite_scroll_collects_all_waves_and_clears_markers() {
        let surface = FakeSurface::new(
            vec!["a", "b"],
            vec![vec!["c"], vec!["d", "e"]],
        );
        let items = collect_items(&surface, ".item", &options(InteractionStrategy::InfiniteScroll))
            .await
            .unwrap();
        assert_eq!(items, vec!["a", "b", "c", "d", "e"]);
        assert!(surface.state.lock().unwrap().cleared);
    }

    #[tokio::test]
    async fn infinite_scroll_stops_after_consecutive_empty_scrolls() {
        let surface = NeverBottom(FakeSurface::new(vec!["a"], vec![]));
        let items = collect_items(&surface, ".item", &options(InteractionStrategy::InfiniteScroll))
            .await
            .unwrap();
        assert_eq!(items, vec!["a"]);
        assert_eq!(surface.0.state.lock().unwrap().scrolls, 2);
    }

    #[tokio::test]
    async fn infinite_scroll_honors_the_scroll_budget() {
        // One fresh item per scroll, no bottom in sight: only the budget
        // can end the loop.
        let surface = NeverBottom(FakeSurface::new(
            vec!["a"],
            vec![
                vec!["b"],
                vec!["c"],
                vec!["d"],
                vec!["e"],
                vec!["f"],
            ],
        ));
        let mut opts = options(InteractionStrategy::InfiniteScroll);
        opts.max_scrolls = 3;
        let items = collect_items(&surface, ".item", &opts).await.unwrap();
        assert_eq!(items, vec!["a", "b", "c", "d"]);
        assert_eq!(surface.0.state.lock().unwrap().scrolls, 3);
    }

    #[tokio::test]
    async fn infinite_scroll_keeps_going_while_the_bottom_still_loads() {
        // Reaching the bottom releases two lazy batches on successive
        // visits; the loop must not stop until a bottom pass comes back
        // empty.
        let surface = FakeSurface::new(vec!["a"], vec![vec!["b"]])
            .with_bottom_waves(vec![vec!["c"], vec!["d"]]);
        let items = collect_items(&surface, ".item", &options(InteractionStrategy::InfiniteScroll))
            .await
            .unwrap();
        assert_eq!(items, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn max_items_truncates_the_result() {
        let surface = FakeSurface::new(vec!["a", "b", "c"], vec![vec!["d"]]);
        let mut opts = options(InteractionStrategy::InfiniteScroll);
        opts.max_items = Some(2);
        let items = collect_items(&surface, ".item", &opts).await.unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn fixed_scrolls_runs_the_configured_count() {
        let surface = FakeSurface::new(
            vec!["a"],
            vec![vec!["b"], vec!["c"], vec!["d"], vec!["never"]],
        );
        let mut opts = options(InteractionStrategy::FixedScrolls);
        opts.max_scrolls = 3;
        let items = collect_items(&surface, ".item", &opts).await.unwrap();
        assert_eq!(items, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn load_more_collects_until_the_button_stops_working() {
        let surface = FakeSurface::new(vec!["a"], vec![vec!["b"], vec!["c"]]);
        let items = collect_items(
            &surface,
            ".item",
            &options(InteractionStrategy::LoadMoreButton),
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);
        // Two productive clicks plus the one that revealed nothing.
        assert_eq!(surface.state.lock().unwrap().clicks, 3);
    }

    #[tokio::test]
    async fn load_more_stops_after_one_fruitless_click() {
        let surface = FakeSurface::new(vec!["a", "b"], vec![]);
        let items = collect_items(
            &surface,
            ".item",
            &options(InteractionStrategy::LoadMoreButton),
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(surface.state.lock().unwrap().clicks, 1);
    }

    #[tokio::test]
    async fn load_more_respects_the_click_budget() {
        let surface = FakeSurface::new(
            vec!["a"],
            vec![vec!["b"], vec!["c"], vec!["d"], vec!["e"]],
        );
        let mut opts = options(InteractionStrategy::LoadMoreButton);
        opts.max_clicks = 2;
        let items = collect_items(&surface, ".item", &opts).await.unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(surface.state.lock().unwrap().clicks, 2);
    }

    #[tokio::test]
    async fn load_more_gives_up_when_the_button_never_appears() {
        // No waves, so the page height never changes and the search
        // stagnates without a single click.
        let mut surface = FakeSurface::new(vec!["a"], vec![]);
        surface.button_visible = false;
        let items = collect_items(
            &surface,
            ".item",
            &options(InteractionStrategy::LoadMoreButton),
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["a"]);
        let state = surface.state.lock().unwrap();
        assert_eq!(state.clicks, 0);
        // stagnation_timeout 2ms / scroll_delay 1ms = 2 stable scrolls.
        assert_eq!(state.scrolls, 2);
    }

    #[tokio::test]
    async fn load_more_click_failure_ends_the_loop() {
        let mut surface = FakeSurface::new(vec!["a"], vec![vec!["b"], vec!["never"]]);
        surface.fail_click_after = Some(1);
        let items = collect_items(
            &surface,
            ".item",
            &options(InteractionStrategy::LoadMoreButton),
        )
        .await
        .unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[test]
    fn stagnation_count_rounds_up() {
        let mut opts = options(InteractionStrategy::LoadMoreButton);
        opts.scroll_delay = Duration::from_millis(1000);
        opts.stagnation_timeout = Duration::from_millis(2500);
        assert_eq!(opts.required_stable_count(), 3);
        opts.stagnation_timeout = Duration::from_millis(0);
        assert_eq!(opts.required_stable_count(), 1);
    }

    #[test]
    fn settle_delay_respects_floor() {
        for _ in 0..50 {
            let delay = settle_delay(Duration::from_millis(10));
            assert!(delay >= MIN_SETTLE);
        }
    }
}
