//! Email bodies. Every interpolated value is HTML-escaped.

use crate::constants::APP_NAME;
use crate::inference::{AnalysisResult, DataOutput};
use crate::utils::escape_html;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #2c3e50;">{title}</h2>
    {body}
    <p style="color: #7f8c8d; font-size: 12px;">This is an automated message from the {app}.</p>
  </div>
</body>
</html>"#,
        title = escape_html(title),
        body = body,
        app = APP_NAME,
    )
}

pub(crate) fn otp(name: &str, otp: &str, ttl_minutes: i64) -> (String, String) {
    let body = format!(
        r#"<p>Hello {name},</p>
    <p>Your verification code is:</p>
    <p style="font-size: 28px; font-weight: bold; letter-spacing: 6px;">{otp}</p>
    <p>This code expires in {ttl_minutes} minutes. If you did not request it, you can ignore this email.</p>"#,
        name = escape_html(name),
        otp = escape_html(otp),
    );
    (
        format!("Your {} verification code", APP_NAME),
        layout("Verify your email", &body),
    )
}

pub(crate) fn welcome(name: &str) -> (String, String) {
    let body = format!(
        "<p>Hello {},</p>\n    <p>Your account has been created. You can now log in and start uploading customer data for analysis.</p>",
        escape_html(name)
    );
    (
        format!("Welcome to the {}", APP_NAME),
        layout("Welcome!", &body),
    )
}

pub(crate) fn password_changed(name: &str, by_admin: bool) -> (String, String) {
    let detail = if by_admin {
        "An administrator has reset your password. Log in with the temporary password you were given and choose a new one."
    } else {
        "Your password was changed successfully."
    };
    let body = format!(
        "<p>Hello {},</p>\n    <p>{}</p>\n    <p>If you did not expect this change, contact your administrator immediately.</p>",
        escape_html(name),
        detail
    );
    (
        "Your password has been changed".to_string(),
        layout("Password changed", &body),
    )
}

pub(crate) fn reset_link(name: &str, link: &str, valid_minutes: i64) -> (String, String) {
    let link = escape_html(link);
    let body = format!(
        r#"<p>Hello {name},</p>
    <p>We received a request to reset your password. Use the link below to choose a new one:</p>
    <p><a href="{link}">{link}</a></p>
    <p>The link expires in {valid_minutes} minutes. If you did not ask for a reset, you can ignore this email.</p>"#,
        name = escape_html(name),
        link = link,
    );
    (
        "Password reset request".to_string(),
        layout("Reset your password", &body),
    )
}

fn render_data_output(data: &DataOutput) -> String {
    match data {
        DataOutput::Message(message) => format!("<p>{}</p>", escape_html(message)),
        DataOutput::Predictions(predictions) => {
            let rows: String = predictions
                .iter()
                .map(|p| {
                    format!(
                        "<tr><td>{}</td><td>{}</td><td>{:.1}%</td><td>{:.1}%</td><td>{}</td></tr>",
                        escape_html(&p.file),
                        escape_html(p.customer_id.as_deref().unwrap_or("-")),
                        p.prediction.stay_probability * 100.0,
                        p.prediction.churn_probability * 100.0,
                        if p.prediction.prediction == 1 { "Churn" } else { "Stay" },
                    )
                })
                .collect();
            format!(
                "<table border=\"1\" cellpadding=\"4\" style=\"border-collapse: collapse;\">\
                 <tr><th>File</th><th>Customer</th><th>Stay</th><th>Churn</th><th>Prediction</th></tr>{}</table>",
                rows
            )
        }
    }
}

pub(crate) fn result_report(result: &AnalysisResult) -> (String, String) {
    let customer = result.customer_id.as_deref().unwrap_or("Unknown");
    let mut body = format!(
        r#"<p><strong>Final decision:</strong> {decision}</p>
    <p><strong>Customer:</strong> {customer}<br>
    <strong>Requested by:</strong> {by}<br>
    <strong>Completed:</strong> {at}</p>
    <h3>Audio analysis</h3><p>{audio}</p>
    <h3>Customer data analysis</h3>{data}
    <h3>Chat analysis</h3><p>{chat}</p>"#,
        decision = escape_html(&result.final_decision),
        customer = escape_html(customer),
        by = escape_html(&result.triggered_by),
        at = result.timestamp.format("%B %d, %Y; %H:%M:%S UTC"),
        audio = escape_html(&result.audio_output),
        data = render_data_output(&result.data_output),
        chat = escape_html(&result.chat_output),
    );
    if let Some(error) = &result.error {
        body.push_str(&format!(
            "\n    <p style=\"color: #c0392b;\"><strong>Error:</strong> {}</p>",
            escape_html(error)
        ));
    }
    (
        format!("Churn analysis result for customer {}", customer),
        layout("Churn Analysis Report", &body),
    )
}
