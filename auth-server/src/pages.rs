//! HTML pages for the browser-facing flows.
//!
//! Every interpolated value goes through [`escape`].

use axum::response::{Html, IntoResponse, Response};
use http::StatusCode;

pub struct ProviderLink<'a> {
    pub name: &'a str,
    pub label: &'a str,
}

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n</head>\n<body>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        title = escape(title),
    ))
}

fn csrf_field(csrf_token: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"csrf_token\" value=\"{}\">",
        escape(csrf_token)
    )
}

fn notice(error: Option<&str>) -> String {
    error
        .map(|message| format!("<p role=\"alert\">{}</p>\n", escape(message)))
        .unwrap_or_default()
}

pub fn login_page(
    csrf_token: &str,
    providers: &[ProviderLink<'_>],
    error: Option<&str>,
) -> Html<String> {
    let links: String = providers
        .iter()
        .map(|provider| {
            format!(
                "<li><a href=\"/login/{}\">Continue with {}</a></li>\n",
                escape(provider.name),
                escape(provider.label)
            )
        })
        .collect();
    let providers = if links.is_empty() {
        String::new()
    } else {
        format!("<ul>\n{links}</ul>\n")
    };

    layout(
        "Sign in",
        &format!(
            "<h1>Sign in</h1>\n{notice}{providers}\
             <form method=\"post\" action=\"/login/email\">\n{csrf}\n\
             <label>Email <input type=\"email\" name=\"email\" required autocomplete=\"email\"></label>\n\
             <button type=\"submit\">Email me a code</button>\n</form>",
            notice = notice(error),
            csrf = csrf_field(csrf_token),
        ),
    )
}

pub fn otp_page(csrf_token: &str, email: &str, error: Option<&str>) -> Html<String> {
    layout(
        "Enter your code",
        &format!(
            "<h1>Check your email</h1>\n{notice}\
             <p>If an account exists for {email}, we sent it a 6-digit code.</p>\n\
             <form method=\"post\" action=\"/login/verify\">\n{csrf}\n\
             <label>Code <input name=\"code\" inputmode=\"numeric\" pattern=\"[0-9]{{6}}\" \
             maxlength=\"6\" required autocomplete=\"one-time-code\"></label>\n\
             <button type=\"submit\">Sign in</button>\n</form>\n\
             <p><a href=\"/login\">Use a different email</a></p>",
            notice = notice(error),
            email = escape(email),
            csrf = csrf_field(csrf_token),
        ),
    )
}

pub fn consent_page(
    csrf_token: &str,
    client_name: &str,
    client_id: &str,
    scopes: &[&str],
) -> Html<String> {
    let scopes: String = scopes
        .iter()
        .map(|scope| format!("<li>{}</li>\n", escape(scope)))
        .collect();

    layout(
        "Authorize access",
        &format!(
            "<h1>{client} wants to access your account</h1>\n\
             <p>It is asking for:</p>\n<ul>\n{scopes}</ul>\n\
             <form method=\"post\" action=\"/oauth/authorize\">\n{csrf}\n\
             <input type=\"hidden\" name=\"client_id\" value=\"{client_id}\">\n\
             <button type=\"submit\" name=\"decision\" value=\"approve\">Allow</button>\n\
             <button type=\"submit\" name=\"decision\" value=\"deny\">Deny</button>\n</form>",
            client = escape(client_name),
            client_id = escape(client_id),
            csrf = csrf_field(csrf_token),
        ),
    )
}

pub fn landing_page(csrf_token: &str, display_name: &str) -> Html<String> {
    layout(
        "Signed in",
        &format!(
            "<h1>Signed in</h1>\n<p>You are signed in as {name}.</p>\n\
             <form method=\"post\" action=\"/logout\">\n{csrf}\n\
             <button type=\"submit\">Sign out</button>\n</form>",
            name = escape(display_name),
            csrf = csrf_field(csrf_token),
        ),
    )
}

pub fn error_page(message: &str) -> Html<String> {
    layout(
        "Something went wrong",
        &format!(
            "<h1>Something went wrong</h1>\n<p>{}</p>\n<p><a href=\"/\">Start over</a></p>",
            escape(message)
        ),
    )
}

pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, error_page(message)).into_response()
}
