//! Tests for the article and topic data model

use crate::model::{Article, SummaryStatus};

#[test]
fn test_summary_status_round_trip() {
    for status in [
        SummaryStatus::Absent,
        SummaryStatus::Pending,
        SummaryStatus::Processing,
        SummaryStatus::Completed,
        SummaryStatus::Failed,
    ] {
        assert_eq!(SummaryStatus::parse(status.as_str()).unwrap(), status);
    }
    // Legacy rows with no status column value read as absent
    assert_eq!(SummaryStatus::parse("").unwrap(), SummaryStatus::Absent);
    assert!(SummaryStatus::parse("done").is_err());
}

#[test]
fn test_needs_summary() {
    assert!(SummaryStatus::Absent.needs_summary());
    assert!(SummaryStatus::Pending.needs_summary());
    assert!(SummaryStatus::Failed.needs_summary());
    assert!(!SummaryStatus::Completed.needs_summary());
    assert!(!SummaryStatus::Processing.needs_summary());
}

#[test]
fn test_new_article_derives_host() {
    let article = Article::new(
        "https://news.example.com/story/42",
        "https://news.example.com/rss",
    );
    assert_eq!(article.host.as_deref(), Some("news.example.com"));
    assert_eq!(article.summary_status, SummaryStatus::Absent);
    assert!(!article.has_embedding());
}

#[test]
fn test_embedding_text_prefers_cleaned() {
    let mut article = Article::new("https://a.example/1", "https://a.example/rss");
    article.title = "Headline".to_string();
    article.content = "<p>raw html</p>".to_string();
    article.cleaned_text = "clean body".to_string();
    assert_eq!(article.embedding_text(), "Headline clean body");
}

#[test]
fn test_embedding_text_falls_back_to_raw_content() {
    let mut article = Article::new("https://a.example/1", "https://a.example/rss");
    article.title = "Headline".to_string();
    article.content = "raw body".to_string();
    article.cleaned_text = "   ".to_string();
    assert_eq!(article.embedding_text(), "Headline raw body");
}

#[test]
fn test_daily_topic_eligibility() {
    let mut article = Article::new("https://a.example/1", "https://a.example/rss");
    assert!(!article.daily_topic_eligible());

    article.summary_status = SummaryStatus::Completed;
    assert!(!article.daily_topic_eligible());

    article.summary_embedding = Some(vec![0.1, 0.2]);
    assert!(article.daily_topic_eligible());

    // An empty vector does not count as an embedding
    article.summary_embedding = Some(vec![]);
    assert!(!article.daily_topic_eligible());
}
