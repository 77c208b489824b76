//! Scripted in-memory page and mailbox for browser-free tests

#![allow(dead_code)]

use async_trait::async_trait;
use oauth_engine::{
    BrowserPage, FlowEngineError, FlowResult, FlowTimeouts, MailboxOracle, MailboxQuery,
    PageElement, PageSource, RetryPolicy, ScreenshotSink,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What happens to the page when an element is clicked
#[derive(Debug, Clone)]
pub enum ClickEffect {
    Nothing,
    /// Replace the page with a new screen
    Navigate(Screen),
    /// Add elements to the current screen
    Reveal(Vec<MockElement>),
}

#[derive(Debug, Clone)]
pub struct MockElement {
    pub selector: String,
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    pub attributes: HashMap<String, String>,
    pub on_click: ClickEffect,
}

impl MockElement {
    pub fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            text: String::new(),
            visible: true,
            enabled: true,
            attributes: HashMap::new(),
            on_click: ClickEffect::Nothing,
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click = effect;
        self
    }

    pub fn navigates_to(self, screen: Screen) -> Self {
        self.on_click(ClickEffect::Navigate(screen))
    }
}

/// A URL, its elements and its body text
#[derive(Debug, Clone, Default)]
pub struct Screen {
    pub url: String,
    pub elements: Vec<MockElement>,
    pub body: String,
}

impl Screen {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Navigate(String),
    Click(String),
    Type { selector: String, text: String },
    Key { selector: String, key: String },
}

#[derive(Debug)]
struct Route {
    fragment: String,
    screen: Screen,
    once: bool,
}

#[derive(Debug, Default)]
struct MockDom {
    screen: Screen,
    /// Screens served by `navigate`, keyed by a URL substring. One-shot routes are dropped once served.
    routes: Vec<Route>,
    fail_navigation: bool,
    actions: Vec<Action>,
    queries: Vec<String>,
    screenshots: usize,
    closed: bool,
}

/// Scripted page shared between the test and the engine
#[derive(Clone, Default)]
pub struct MockPage {
    dom: Arc<Mutex<MockDom>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page currently showing `screen`
    pub fn showing(screen: Screen) -> Self {
        let page = Self::new();
        page.dom.lock().unwrap().screen = screen;
        page
    }

    /// Serve `screen` when navigating to a URL containing `fragment`.
    /// A screen with an empty URL keeps the requested URL.
    pub fn route(self, fragment: &str, screen: Screen) -> Self {
        self.add_route(fragment, screen, false)
    }

    /// Serve `screen` for the first matching navigation only
    pub fn route_once(self, fragment: &str, screen: Screen) -> Self {
        self.add_route(fragment, screen, true)
    }

    fn add_route(self, fragment: &str, screen: Screen, once: bool) -> Self {
        self.dom.lock().unwrap().routes.push(Route {
            fragment: fragment.to_string(),
            screen,
            once,
        });
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.dom.lock().unwrap().fail_navigation = true;
        self
    }

    pub fn url(&self) -> String {
        self.dom.lock().unwrap().screen.url.clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.dom.lock().unwrap().actions.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Click(selector) => Some(selector),
                _ => None,
            })
            .collect()
    }

    /// Everything typed into `selector`, concatenated
    pub fn typed(&self, selector: &str) -> String {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Type { selector: s, text } if s == selector => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Number of separate type calls into `selector`
    pub fn type_calls(&self, selector: &str) -> usize {
        self.actions()
            .iter()
            .filter(|action| matches!(action, Action::Type { selector: s, .. } if s == selector))
            .count()
    }

    pub fn queries(&self) -> Vec<String> {
        self.dom.lock().unwrap().queries.clone()
    }

    pub fn screenshots(&self) -> usize {
        self.dom.lock().unwrap().screenshots
    }

    pub fn is_closed(&self) -> bool {
        self.dom.lock().unwrap().closed
    }
}

struct MockHandle {
    dom: Arc<Mutex<MockDom>>,
    element: MockElement,
}

#[async_trait]
impl PageElement for MockHandle {
    async fn is_visible(&self) -> FlowResult<bool> {
        Ok(self.element.visible)
    }

    async fn is_enabled(&self) -> FlowResult<bool> {
        Ok(self.element.enabled)
    }

    async fn text(&self) -> FlowResult<String> {
        Ok(self.element.text.clone())
    }

    async fn attribute(&self, name: &str) -> FlowResult<Option<String>> {
        Ok(self.element.attributes.get(name).cloned())
    }

    async fn scroll_into_view(&self) -> FlowResult<()> {
        Ok(())
    }

    async fn click(&self) -> FlowResult<()> {
        let mut dom = self.dom.lock().unwrap();
        dom.actions.push(Action::Click(self.element.selector.clone()));
        match &self.element.on_click {
            ClickEffect::Nothing => {}
            ClickEffect::Navigate(screen) => dom.screen = screen.clone(),
            ClickEffect::Reveal(elements) => dom.screen.elements.extend(elements.iter().cloned()),
        }
        Ok(())
    }

    async fn focus(&self) -> FlowResult<()> {
        Ok(())
    }

    async fn clear(&self) -> FlowResult<()> {
        Ok(())
    }

    async fn type_text(&self, text: &str) -> FlowResult<()> {
        self.dom.lock().unwrap().actions.push(Action::Type {
            selector: self.element.selector.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn press_key(&self, key: &str) -> FlowResult<()> {
        self.dom.lock().unwrap().actions.push(Action::Key {
            selector: self.element.selector.clone(),
            key: key.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn navigate(&self, url: &str) -> FlowResult<()> {
        let mut dom = self.dom.lock().unwrap();
        dom.actions.push(Action::Navigate(url.to_string()));
        if dom.fail_navigation {
            return Err(FlowEngineError::Navigation(format!(
                "net::ERR_NAME_NOT_RESOLVED at {}",
                url
            )));
        }
        let routed = match dom.routes.iter().position(|route| url.contains(route.fragment.as_str())) {
            Some(index) if dom.routes[index].once => Some(dom.routes.remove(index).screen),
            Some(index) => Some(dom.routes[index].screen.clone()),
            None => None,
        };
        dom.screen = match routed {
            Some(screen) if screen.url.is_empty() => Screen { url: url.to_string(), ..screen },
            Some(screen) => screen,
            None => Screen::new(url),
        };
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> FlowResult<()> {
        Ok(())
    }

    async fn current_url(&self) -> FlowResult<String> {
        Ok(self.url())
    }

    async fn query_all(&self, selector: &str) -> FlowResult<Vec<Box<dyn PageElement>>> {
        let mut dom = self.dom.lock().unwrap();
        dom.queries.push(selector.to_string());
        Ok(dom
            .screen
            .elements
            .iter()
            .filter(|element| element.selector == selector)
            .map(|element| {
                Box::new(MockHandle {
                    dom: self.dom.clone(),
                    element: element.clone(),
                }) as Box<dyn PageElement>
            })
            .collect())
    }

    async fn body_text(&self) -> FlowResult<String> {
        Ok(self.dom.lock().unwrap().screen.body.clone())
    }

    async fn screenshot(&self) -> FlowResult<Vec<u8>> {
        self.dom.lock().unwrap().screenshots += 1;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn close(&self) -> FlowResult<()> {
        self.dom.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out the same scripted page every time
pub struct MockPageSource {
    page: MockPage,
    opened: AtomicUsize,
}

impl MockPageSource {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for MockPageSource {
    async fn open_page(&self) -> FlowResult<Box<dyn BrowserPage>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.page.clone()))
    }
}

/// Mailbox that replays scripted answers, then a fixed fallback
pub struct ScriptedMailbox {
    answers: Mutex<VecDeque<FlowResult<Option<String>>>>,
    fallback: Option<String>,
    calls: AtomicU32,
    queries: Mutex<Vec<String>>,
}

impl ScriptedMailbox {
    /// Never finds a message
    pub fn empty() -> Self {
        Self::with_fallback(None)
    }

    /// Always returns `body`
    pub fn always(body: &str) -> Self {
        Self::with_fallback(Some(body.to_string()))
    }

    fn with_fallback(fallback: Option<String>) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer the next search with `answer`
    pub fn then(self, answer: FlowResult<Option<String>>) -> Self {
        self.answers.lock().unwrap().push_back(answer);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sender of every query seen, in order
    pub fn senders(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailboxOracle for ScriptedMailbox {
    async fn search(&self, query: &MailboxQuery) -> FlowResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.from.clone());
        match self.answers.lock().unwrap().pop_front() {
            Some(answer) => answer,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Keeps the labels it was asked to capture
#[derive(Default)]
pub struct RecordingSink {
    labels: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScreenshotSink for RecordingSink {
    async fn capture(&self, _page: &dyn BrowserPage, label: &str) {
        self.labels.lock().unwrap().push(label.to_string());
    }
}

/// Millisecond timings so flows finish quickly
pub fn fast_timeouts() -> FlowTimeouts {
    FlowTimeouts {
        page_load_ms: 100,
        login_probe_delay_ms: 0,
        login_check_ms: 20,
        lookup_ms: 100,
        settle_ms: 0,
        after_login_ms: 0,
        callback_timeout_ms: 200,
        callback_poll_ms: 5,
        flow_deadline_ms: 5_000,
    }
}

/// Two immediate passes per lookup
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::immediate(2)
}
