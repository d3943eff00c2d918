use client_core::models::{Message, Role};

/// Turns successive transcript snapshots into the text still to be printed for
/// the newest assistant reply.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    message_id: Option<String>,
    printed_text: String,
    printed_products: usize,
}

impl ReplyPrinter {
    /// Starts from a transcript whose newest reply has already been shown, so
    /// only later changes are rendered.
    pub fn resume(messages: &[Message]) -> Self {
        let mut printer = Self::default();
        printer.render(messages);
        printer
    }

    pub fn render(&mut self, messages: &[Message]) -> String {
        let Some(reply) = messages.last().filter(|message| message.role == Role::Assistant) else {
            return String::new();
        };

        if self.message_id.as_deref() != Some(reply.id.as_str()) {
            self.message_id = Some(reply.id.clone());
            self.printed_text.clear();
            self.printed_products = 0;
        }

        let mut output = String::new();
        match reply.content.strip_prefix(self.printed_text.as_str()) {
            Some(delta) => output.push_str(delta),
            None => {
                // Content was replaced rather than extended (fallback reply).
                output.push('\n');
                output.push_str(&reply.content);
            }
        }
        self.printed_text.clone_from(&reply.content);

        for product in reply.products.iter().skip(self.printed_products) {
            output.push_str(&format!("\n  * {} ({})", product.name, product.brand));
        }
        self.printed_products = reply.products.len();

        output
    }
}
