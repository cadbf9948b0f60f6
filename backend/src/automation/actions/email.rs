// send_email action - renders a named template and delivers it through the
// SMTP email service.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::services::EmailService;

use super::super::events::Event;
use super::super::rules::ActionSpec;
use super::{render_template, ActionError, ActionHandler};

pub struct EmailTemplate {
    pub subject: &'static str,
    pub html_body: &'static str,
}

/// Templates the rule editor offers in its dropdown. Placeholders are
/// filled from the lead record and the triggering event's payload.
pub fn template(name: &str) -> Option<EmailTemplate> {
    match name {
        "welcome" => Some(EmailTemplate {
            subject: "Welcome aboard, {{lead.name}}!",
            html_body: r#"
                <html>
                <body style="font-family: Arial, sans-serif; padding: 20px;">
                    <h2>Welcome, {{lead.name}}!</h2>
                    <p>Thanks for your interest. One of our team members will be in touch shortly.</p>
                </body>
                </html>
            "#,
        }),
        "follow_up" => Some(EmailTemplate {
            subject: "Following up, {{lead.name}}",
            html_body: r#"
                <html>
                <body style="font-family: Arial, sans-serif; padding: 20px;">
                    <h2>Just checking in</h2>
                    <p>Hi {{lead.name}}, we wanted to follow up on your recent inquiry.</p>
                </body>
                </html>
            "#,
        }),
        "idle_checkin" => Some(EmailTemplate {
            subject: "We haven't heard from you, {{lead.name}}",
            html_body: r#"
                <html>
                <body style="font-family: Arial, sans-serif; padding: 20px;">
                    <h2>Still interested?</h2>
                    <p>Hi {{lead.name}}, it's been {{idle_days}} days since we last heard from you.</p>
                    <p>Reply to this email and we'll pick up right where we left off.</p>
                </body>
                </html>
            "#,
        }),
        _ => None,
    }
}

pub struct SendEmailHandler {
    pool: PgPool,
    email_service: EmailService,
}

impl SendEmailHandler {
    pub fn new(pool: PgPool, email_service: EmailService) -> Self {
        Self {
            pool,
            email_service,
        }
    }

    async fn lead_contact(&self, entity_id: Uuid) -> Result<(String, String), ActionError> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT name, email FROM leads WHERE id = $1")
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ActionError::transient(format!("lead lookup failed: {}", e)))?;

        match row {
            Some((name, Some(email))) => Ok((name, email)),
            Some((_, None)) => Err(ActionError::permanent(format!(
                "lead {} has no email address",
                entity_id
            ))),
            None => Err(ActionError::permanent(format!(
                "lead {} does not exist",
                entity_id
            ))),
        }
    }
}

#[async_trait]
impl ActionHandler for SendEmailHandler {
    async fn execute(&self, config: &ActionSpec, event: &Event) -> Result<(), ActionError> {
        let ActionSpec::SendEmail { template: name } = config else {
            return Err(ActionError::permanent("send_email handler got a foreign config"));
        };

        let tpl = template(name)
            .ok_or_else(|| ActionError::permanent(format!("unknown email template '{}'", name)))?;

        let (lead_name, lead_email) = self.lead_contact(event.entity_id).await?;

        let mut vars = event.payload.clone();
        if let Some(map) = vars.as_object_mut() {
            map.insert(
                "lead".to_string(),
                serde_json::json!({ "name": lead_name, "email": lead_email }),
            );
        }

        let subject = render_template(tpl.subject, &vars);
        let html_body = render_template(tpl.html_body, &vars);

        self.email_service
            .send_email(&lead_email, Some(&lead_name), &subject, &html_body, None)
            .await
            .map_err(|e| ActionError::transient(format!("smtp delivery failed: {}", e)))?;

        info!("Sent '{}' email to lead {}", name, event.entity_id);
        Ok(())
    }
}
