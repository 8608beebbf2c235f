#![cfg(feature = "chrome")]

use crawl_state::driver::Driver;
use crawl_state::state::{HashStateFactory, StateFactory, TreeEditStateFactory};
use crawl_state::{BrowserSession, LaunchOptions};
use std::time::Duration;

const SHOP: &str = "data:text/html,<html><body><h1>Shop</h1><button id='buy'>Buy</button><script>var x = 1;</script></body></html>";

#[test]
#[ignore] // Requires Chrome to be installed
fn test_document_extraction() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");
    session.navigate(SHOP).expect("Failed to navigate");

    let tree = session.get_document().expect("Failed to extract document");

    assert!(tree.find_by_tag("button").is_some());
    assert!(tree.find_by_tag("script").is_none());
    let button = tree.find_by_attribute("id", "buy").unwrap();
    assert_eq!(tree.xpath(button), "/html[1]/body[1]/button[1]");

    let json = tree.to_json().expect("Failed to convert to JSON");
    assert!(json.contains("buy"));
}

#[test]
#[ignore]
fn test_reload_is_the_same_state() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");
    let factory = TreeEditStateFactory::default();

    session.navigate(SHOP).expect("Failed to navigate");
    let first = factory.new_state(0, "index", Some(SHOP), &session).expect("Failed to build state");

    session.navigate(SHOP).expect("Failed to navigate");
    let second = factory.new_state(1, "index-again", Some(SHOP), &session).expect("Failed to build state");

    println!("Distance after reload: {}", first.distance(&second));
    assert!(first.equals(&second));
    assert_eq!(first.candidates().len(), 1);
}

#[test]
#[ignore]
fn test_screenshot_states() {
    let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");
    session.navigate(SHOP).expect("Failed to navigate");

    // Small delay to let the page render
    std::thread::sleep(Duration::from_millis(500));

    let factory = HashStateFactory::default();
    let first = factory.new_state(0, "index", None, &session).expect("Failed to build state");
    let second = factory.new_state(1, "index-again", None, &session).expect("Failed to build state");

    assert!(first.equals(&second));
    assert!(first.in_threshold(&second));
}
