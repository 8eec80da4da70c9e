//! Aggregates of the product landscape.
//!
//! Field names serialize in camelCase so the JSON matches what the composite
//! service and the event producers send (`productId`, `recommendationId`, ...).

use crate::aggregate::{Aggregate, NaturalKey};
use serde::{Deserialize, Serialize};

/// Core product facts. One record per product id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product id (natural key).
    pub product_id: i32,
    /// Display name.
    pub name: String,
    /// Shipping weight.
    pub weight: i32,
    /// Address of the instance that served this product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_address: Option<String>,
}

impl Product {
    /// Create a product.
    #[must_use]
    pub fn new(product_id: i32, name: impl Into<String>, weight: i32) -> Self {
        Self {
            product_id,
            name: name.into(),
            weight,
            service_address: None,
        }
    }
}

impl Aggregate for Product {
    const NAME: &'static str = "product";

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::subject(self.product_id)
    }

    fn describe_key(&self) -> String {
        format!("Product Id: {}", self.product_id)
    }

    fn set_service_address(&mut self, address: Option<String>) {
        self.service_address = address;
    }
}

/// A recommendation of a product. Many per product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// Product the recommendation belongs to.
    pub product_id: i32,
    /// Recommendation id, unique within the product.
    pub recommendation_id: i32,
    /// Author name.
    pub author: String,
    /// Rating.
    pub rate: i32,
    /// Free text.
    pub content: String,
    /// Address of the instance that served this recommendation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_address: Option<String>,
}

impl Recommendation {
    /// Create a recommendation.
    #[must_use]
    pub fn new(
        product_id: i32,
        recommendation_id: i32,
        author: impl Into<String>,
        rate: i32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            recommendation_id,
            author: author.into(),
            rate,
            content: content.into(),
            service_address: None,
        }
    }
}

impl Aggregate for Recommendation {
    const NAME: &'static str = "recommendation";

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::member(self.product_id, self.recommendation_id)
    }

    fn describe_key(&self) -> String {
        format!(
            "Product Id: {}, Recommendation Id: {}",
            self.product_id, self.recommendation_id
        )
    }

    fn set_service_address(&mut self, address: Option<String>) {
        self.service_address = address;
    }
}

/// A review of a product. Many per product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Product the review belongs to.
    pub product_id: i32,
    /// Review id, unique within the product.
    pub review_id: i32,
    /// Author name.
    pub author: String,
    /// Review title.
    pub subject: String,
    /// Free text.
    pub content: String,
    /// Address of the instance that served this review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_address: Option<String>,
}

impl Review {
    /// Create a review.
    #[must_use]
    pub fn new(
        product_id: i32,
        review_id: i32,
        author: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            review_id,
            author: author.into(),
            subject: subject.into(),
            content: content.into(),
            service_address: None,
        }
    }
}

impl Aggregate for Review {
    const NAME: &'static str = "review";

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::member(self.product_id, self.review_id)
    }

    fn describe_key(&self) -> String {
        format!(
            "Product Id: {}, Review Id: {}",
            self.product_id, self.review_id
        )
    }

    fn set_service_address(&mut self, address: Option<String>) {
        self.service_address = address;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_json_uses_camel_case() {
        let recommendation = Recommendation::new(1, 3, "Author 3", 3, "Content 3");
        let json = serde_json::to_value(&recommendation).unwrap();

        assert_eq!(json["productId"], 1);
        assert_eq!(json["recommendationId"], 3);
        assert!(json.get("serviceAddress").is_none());
    }

    #[test]
    fn describe_key_names_both_components() {
        let recommendation = Recommendation::new(1, 1, "a", 1, "c");
        assert_eq!(
            recommendation.describe_key(),
            "Product Id: 1, Recommendation Id: 1"
        );

        let review = Review::new(2, 5, "a", "s", "c");
        assert_eq!(review.describe_key(), "Product Id: 2, Review Id: 5");

        assert_eq!(Product::new(9, "n", 1).describe_key(), "Product Id: 9");
    }

    #[test]
    fn product_key_has_no_member() {
        let product = Product::new(4, "n", 1);
        assert_eq!(product.natural_key(), NaturalKey::subject(4));
        assert_eq!(product.subject_id(), 4);
    }

    #[test]
    fn service_address_is_read_back_when_present() {
        let json = r#"{"productId":1,"name":"n","weight":1,"serviceAddress":"host/1.2.3.4:7001"}"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.service_address.as_deref(), Some("host/1.2.3.4:7001"));
    }
}
