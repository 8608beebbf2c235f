use crate::browser::config::{ConnectionOptions, LaunchOptions};
use crate::dom::{BoundingBox, DocumentTree, ElementNode, NodeId};
use crate::driver::{Driver, How, Identification};
use crate::error::{Result, StateError};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, Tab};
use image::DynamicImage;
use log::debug;
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// Browser session that manages a Chrome/Chromium instance and one working tab
pub struct BrowserSession {
    /// Keeps the browser process alive for as long as the session exists
    browser: Browser,
    tab: Arc<Tab>,
    timeout: Duration,
}

fn driver_error(context: &str, e: impl std::fmt::Display) -> StateError {
    StateError::DriverFailed(format!("{}: {}", context, e))
}

/// JavaScript string literal for `value`
fn js_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn xpath_lookup(xpath: &str) -> Result<String> {
    Ok(format!(
        "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
        js_string(xpath)?
    ))
}

/// Expression evaluating to the matching element or null
fn lookup_expression(identification: &Identification) -> Result<String> {
    let value = js_string(&identification.value)?;
    Ok(match identification.how {
        How::Xpath => xpath_lookup(&identification.value)?,
        How::Id => format!("document.getElementById({})", value),
        How::Name => format!("document.getElementsByName({})[0]", value),
        How::Tag => format!("document.getElementsByTagName({})[0]", value),
        How::Text => format!(
            "Array.from(document.querySelectorAll('*')).find(el => Array.from(el.childNodes).some(n => n.nodeType === Node.TEXT_NODE && n.textContent.trim() === {}.trim()))",
            value
        ),
    })
}

impl BrowserSession {
    /// Launch a new browser instance with the given options
    pub fn launch(options: LaunchOptions) -> Result<Self> {
        let mut launch_opts = headless_chrome::LaunchOptions::default();

        launch_opts.ignore_default_args.push(OsStr::new("--enable-automation"));
        launch_opts.args.push(OsStr::new("--disable-blink-features=AutomationControlled"));
        launch_opts.idle_browser_timeout = Duration::from_secs(60 * 60);
        launch_opts.headless = options.headless;
        launch_opts.window_size = Some((options.window_width, options.window_height));
        launch_opts.path = options.chrome_path;
        launch_opts.user_data_dir = options.user_data_dir;
        launch_opts.sandbox = options.sandbox;

        let browser = Browser::new(launch_opts).map_err(|e| driver_error("Failed to launch browser", e))?;
        let tab = browser.new_tab().map_err(|e| driver_error("Failed to create tab", e))?;

        Self::with_tab(browser, tab, Duration::from_millis(options.timeout))
    }

    /// Attach to a running browser via its DevTools WebSocket
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        let browser = Browser::connect(options.ws_url).map_err(|e| driver_error("Failed to connect", e))?;
        let tab = browser.new_tab().map_err(|e| driver_error("Failed to create tab", e))?;

        Self::with_tab(browser, tab, Duration::from_millis(options.timeout))
    }

    fn with_tab(browser: Browser, tab: Arc<Tab>, timeout: Duration) -> Result<Self> {
        tab.set_default_timeout(timeout);
        Ok(Self { browser, tab, timeout })
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Navigate the working tab and wait for the load to finish
    pub fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| driver_error(&format!("Failed to navigate to {}", url), e))?
            .wait_until_navigated()
            .map_err(|e| driver_error("Navigation timeout", e))?;
        debug!("Navigated to {}", url);
        Ok(())
    }

    /// Current URL of the working tab
    pub fn url(&self) -> String {
        self.tab.get_url()
    }

    /// Evaluate an expression and return its JSON value
    fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| driver_error("Failed to evaluate script", e))?;
        Ok(result.value.unwrap_or(Value::Null))
    }
}

impl Driver for BrowserSession {
    fn get_document(&self) -> Result<DocumentTree> {
        let value = self.evaluate(include_str!("extract_dom.js"))?;
        let json = value
            .as_str()
            .ok_or_else(|| StateError::DriverFailed("DOM extraction returned no JSON string".to_string()))?;
        let root: ElementNode = serde_json::from_str(json)?;
        Ok(DocumentTree::from_element(&root))
    }

    fn element_exists(&self, identification: &Identification) -> bool {
        let exists = lookup_expression(identification)
            .and_then(|lookup| self.evaluate(&format!("!!({})", lookup)));
        match exists {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                debug!("Could not look up {}: {}", identification, e);
                false
            }
        }
    }

    fn take_screenshot(&self, timeout: Duration) -> Result<DynamicImage> {
        self.tab.set_default_timeout(timeout);
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true);
        self.tab.set_default_timeout(self.timeout);

        let png = png.map_err(|e| driver_error("Failed to capture screenshot", e))?;
        Ok(image::load_from_memory(&png)?)
    }

    fn measure_element_rect(&self, tree: &DocumentTree, node: NodeId) -> Result<BoundingBox> {
        let xpath = tree.xpath(node);
        let expression = format!(
            "(function() {{ const el = {}; if (!el || !el.getBoundingClientRect) return null; \
             const r = el.getBoundingClientRect(); \
             return JSON.stringify({{x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height}}); }})()",
            xpath_lookup(&xpath)?
        );
        let value = self.evaluate(&expression)?;
        let json = value
            .as_str()
            .ok_or_else(|| StateError::NodeNotFound(xpath.clone()))?;
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_expression_escapes_values() {
        let id = Identification::id("say \"hi\"");
        assert_eq!(
            lookup_expression(&id).unwrap(),
            r#"document.getElementById("say \"hi\"")"#
        );

        let xpath = lookup_expression(&Identification::xpath("/html[1]/body[1]")).unwrap();
        assert!(xpath.starts_with("document.evaluate(\"/html[1]/body[1]\""));
    }

    #[test]
    #[ignore] // requires Chrome, run with: cargo test -- --ignored
    fn test_launch_and_capture() {
        let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");
        session
            .navigate("data:text/html,<html><body><button id='go'>Go</button></body></html>")
            .expect("Failed to navigate");

        let tree = session.get_document().expect("Failed to extract document");
        assert!(tree.find_by_tag("button").is_some());
        assert!(session.element_exists(&Identification::id("go")));
        assert!(!session.element_exists(&Identification::id("missing")));
        assert!(session.take_screenshot(Duration::from_secs(5)).is_ok());
    }
}
