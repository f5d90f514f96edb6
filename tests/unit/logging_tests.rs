// Unit tests for logging initialization

use torii::logging::init_subscriber;

#[test]
fn test_subscriber_installs_once_then_rejects_duplicates() {
    // First installation in this process wins; a second must error rather
    // than silently replace the global subscriber
    let first = init_subscriber(false);
    assert!(first.is_ok());

    let second = init_subscriber(true);
    assert!(second.is_err());
}
