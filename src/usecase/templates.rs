//! HTML bodies for the critical email categories.

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn layout(heading: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1"></head>
<body style="margin:0;padding:0;background:#f4f4f7;font-family:Helvetica,Arial,sans-serif;">
<table role="presentation" width="100%" cellspacing="0" cellpadding="0">
<tr><td align="center" style="padding:40px 16px;">
<table role="presentation" width="480" cellspacing="0" cellpadding="0" style="background:#ffffff;border-radius:8px;padding:32px;">
<tr><td>
<h1 style="margin:0 0 16px;font-size:22px;color:#1f2933;">{heading}</h1>
{content}
</td></tr>
</table>
</td></tr>
</table>
</body>
</html>"#
    )
}

pub fn otp_email_html(code: &str) -> String {
    let content = format!(
        r#"<p style="font-size:15px;color:#52606d;">Use the code below to verify your account. It expires shortly.</p>
<p style="font-size:32px;letter-spacing:8px;font-weight:bold;color:#1f2933;text-align:center;margin:24px 0;">{}</p>
<p style="font-size:13px;color:#9aa5b1;">If you did not request this code, you can ignore this email.</p>"#,
        escape(code)
    );
    layout("Your verification code", &content)
}

pub fn password_reset_html(reset_url: &str) -> String {
    let url = escape(reset_url);
    let content = format!(
        r#"<p style="font-size:15px;color:#52606d;">We received a request to reset your password.</p>
<p style="text-align:center;margin:24px 0;"><a href="{url}" style="background:#3e63dd;color:#ffffff;padding:12px 24px;border-radius:6px;text-decoration:none;font-weight:bold;">Reset password</a></p>
<p style="font-size:13px;color:#9aa5b1;">If the button does not work, open this link: {url}</p>
<p style="font-size:13px;color:#9aa5b1;">If you did not ask for a reset, no action is needed.</p>"#
    );
    layout("Reset your password", &content)
}
