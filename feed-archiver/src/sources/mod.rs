pub mod rss_feed;
pub mod table_rows;

pub use rss_feed::RssFeedSource;
pub use table_rows::TableRowsSource;
