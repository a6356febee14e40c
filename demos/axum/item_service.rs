use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_correlation::{fields, Logger};

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item id {0} is reserved")]
    Reserved(u64),
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedItem {
    pub id: u64,
    pub name: String,
    pub status: &'static str,
    pub original_data: Value,
}

#[derive(Debug, Clone)]
pub struct ItemService {
    logger: Logger,
}

impl ItemService {
    pub fn new(logger: Logger) -> Self {
        ItemService { logger }
    }

    /// Simulate processing `data` for the item, every record carries the
    /// identity of the request being served.
    pub fn process_item_data(&self, item_id: u64, data: Value) -> Result<ProcessedItem, ItemError> {
        self.logger.info(
            format!("ItemService: Starting to process item ID: {item_id}"),
            fields! { "item_id" => item_id },
        );

        if item_id == 0 {
            let error = ItemError::Reserved(item_id);
            self.logger.error_with(
                &error,
                format!("ItemService: Error processing item ID {item_id}: {error}"),
                fields! { "item_id" => item_id },
            );
            return Err(error);
        }

        let name = data
            .get("name")
            .and_then(Value::as_str)
            .map_or_else(|| format!("Item {item_id}"), String::from);
        let processed = ProcessedItem {
            id: item_id,
            name,
            status: "processed",
            original_data: data,
        };

        self.logger.debug(
            format!("ItemService: Successfully processed data for item ID: {item_id}"),
            fields! { "processed_data" => processed },
        );
        Ok(processed)
    }
}

pub fn item_data(item_id: u64) -> Value {
    json!({ "name": format!("Product {item_id}") })
}
