use super::*;

#[test]
fn feed_url_maps_scheme() {
    assert_eq!(feed_url("http://localhost:3000", "4").unwrap(), "ws://localhost:3000/api/auctions/4/feed");
    assert_eq!(feed_url("https://auctions.example", "1").unwrap(), "wss://auctions.example/api/auctions/1/feed");
    assert!(matches!(feed_url("ftp://nope", "1"), Err(CliError::InvalidServerUrl(_))));
}

#[test]
fn decisions_render_as_single_lines() {
    assert_eq!(describe_decision("/my-bids", &GuardDecision::Render), "render /my-bids");
    assert_eq!(describe_decision("/my-bids", &GuardDecision::RedirectToLogin), "redirect /login");
    assert_eq!(describe_decision("/admin", &GuardDecision::RedirectToHome), "redirect /");
    let suspended = describe_decision("/admin", &GuardDecision::Suspended { user_id: "banned1".into() });
    assert!(suspended.starts_with("suspended"));
    assert!(suspended.contains("banned1"));
}

#[test]
fn bid_line_includes_optional_message() {
    let mut bid = auctionverse::services::bid_feed::synthesize_bid("1", 445);
    bid.message = None;
    assert!(describe_bid(&bid).starts_with(&format!("${} by ", bid.amount)));
    bid.message = Some("mine".into());
    assert!(describe_bid(&bid).ends_with(": \"mine\""));
}

#[test]
fn listing_line_shows_status_and_price() {
    use auctionverse::services::auction::{AuctionStatus, Seller};
    let auction = Auction {
        id: "7".into(),
        title: "Old Lamp Shade".into(),
        description: String::new(),
        image_url: String::new(),
        starting_bid: 300,
        current_bid: 310,
        bid_count: 1,
        views: 0,
        likes: 0,
        seller: Seller { id: "user2".into(), name: "Jane Smith".into(), avatar: String::new() },
        starts_at: None,
        ends_at: OffsetDateTime::now_utc() + time::Duration::days(1),
        closed: false,
    };
    let line = describe_listing(&AuctionListing { auction, status: AuctionStatus::EndingSoon });
    assert_eq!(line, "7 [ending-soon] Old Lamp Shade: $310 (1 bids)");
}

#[test]
fn denied_error_carries_guard_outcome() {
    let err = CliError::Denied(describe_decision("/my-bids", &GuardDecision::RedirectToLogin));
    assert_eq!(err.to_string(), "redirect /login");
}
