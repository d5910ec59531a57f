//! Basic example demonstrating the lodestone client.

use std::time::Duration;

use lodestone::{field, Client, Document};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> lodestone::Result<()> {
  // Connect to a lodestone server
  let client = Client::connect("localhost:7017").await?;
  client.ping().await?;
  println!("Connected!");

  let menu = client.database("cafe").collection("menu");

  // Callback style: the continuation runs once on the client's runtime
  let query_filter = Document::new().with("name", "Maple Latte");
  let (done, finished) = oneshot::channel();
  menu.find_one_document(query_filter.clone(), move |result| {
    match result {
      Err(e) => println!("Did not find matching documents: {e}"),
      Ok(Some(document)) => println!("Found a matching document: {document}"),
      Ok(None) => println!("No document matched"),
    }
    let _ = done.send(());
  });
  let _ = finished.await;

  // Async style with a filter builder and a shorter timeout
  let cheap = menu.clone().with_timeout(Duration::from_secs(5));
  match cheap.find_one(field("price").lt(4.0)).await? {
    Some(doc) => println!("Cheapest pick: {}", doc.get_str("name").unwrap_or("<unnamed>")),
    None => println!("Nothing under $4"),
  }

  // Cancel a call whose result is no longer wanted
  let handle = menu.find_one_document(query_filter, |_| println!("never printed"));
  if handle.cancel() {
    println!("Cancelled pending lookup");
  }

  client.close().await;
  Ok(())
}
