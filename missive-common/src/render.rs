//! Boundary to the template renderer
//!
//! Rendering happens outside the queue. The queue only needs something that
//! turns a template id and variables into content, once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Output of a single render
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

/// A pure function from template + variables to content.
pub trait TemplateRenderer: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Render `template_id` with `variables`
    ///
    /// # Errors
    ///
    /// Implementation defined, typically an unknown template or a missing variable.
    fn render(
        &self,
        template_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<RenderedContent, Self::Error>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use chrono::Utc;

    use super::*;
    use crate::{Message, MessageBuilder};

    #[derive(Debug, thiserror::Error)]
    #[error("unknown template {0}")]
    struct UnknownTemplate(String);

    struct OrderTemplates;

    impl TemplateRenderer for OrderTemplates {
        type Error = UnknownTemplate;

        fn render(
            &self,
            template_id: &str,
            variables: &BTreeMap<String, String>,
        ) -> Result<RenderedContent, Self::Error> {
            match template_id {
                "order-shipped" => {
                    let order = variables.get("order").map_or("?", String::as_str);
                    Ok(RenderedContent {
                        subject: format!("Order {order} shipped"),
                        html: Some(format!("<p>Order {order} is on its way</p>")),
                        text: Some(format!("Order {order} is on its way")),
                    })
                }
                other => Err(UnknownTemplate(other.to_string())),
            }
        }
    }

    #[test]
    fn test_rendered_content_feeds_builder() {
        let variables = BTreeMap::from([("order".to_string(), "A-17".to_string())]);
        let content = OrderTemplates.render("order-shipped", &variables).unwrap();

        let message: Message = MessageBuilder::from_rendered(content)
            .to("buyer@example.com")
            .build(Utc::now())
            .unwrap();

        assert_eq!(message.subject(), "Order A-17 shipped");
        assert_eq!(message.text_content(), Some("Order A-17 is on its way"));
        assert!(OrderTemplates.render("missing", &variables).is_err());
    }
}
