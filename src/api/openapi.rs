use super::handlers::{account, devices, health, pin, recovery, two_factor};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Router that serves every endpoint and feeds the `OpenAPI` document.
///
/// Register new endpoints here with `.routes(routes!(...))`.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(account::login))
        .routes(routes!(account::activate))
        .routes(routes!(account::change_password))
        .routes(routes!(account::profile))
        .routes(routes!(pin::setup))
        .routes(routes!(two_factor::setup))
        .routes(routes!(two_factor::confirm))
        .routes(routes!(two_factor::disable))
        .routes(routes!(recovery::email_forgot_password))
        .routes(routes!(recovery::email_verify_code))
        .routes(routes!(recovery::email_reset_password))
        .routes(routes!(recovery::pin_check))
        .routes(routes!(recovery::pin_verify))
        .routes(routes!(recovery::pin_reset_password))
        .routes(routes!(recovery::two_factor_start))
        .routes(routes!(recovery::two_factor_verify))
        .routes(routes!(recovery::two_factor_reset_password))
        .routes(routes!(recovery::back))
        .routes(routes!(recovery::dual_status))
        .routes(routes!(devices::register_device))
        .routes(routes!(devices::get_device))
        .routes(routes!(devices::mac_vendor));

    let tags = [
        ("portal", "University self-service portal API"),
        ("health", "Liveness and database status"),
        ("account", "Login, activation, password change and profile"),
        ("recovery", "Password recovery by email code, PIN or 2FA"),
        ("pin", "Recovery PIN management"),
        ("2fa", "TOTP enrollment"),
        ("devices", "Device registration and MAC vendor lookup"),
    ]
    .into_iter()
    .map(|(name, description)| {
        let mut tag = Tag::new(name);
        tag.description = Some(description.to_string());
        tag
    })
    .collect();

    router.get_openapi_mut().tags = Some(tags);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo joins authors with `:`; only the first one is published.
    let primary = env!("CARGO_PKG_AUTHORS").split(':').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Split `Name <email>` into its parts.
fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, rest)) => (
            optional_str(name),
            optional_str(rest.trim_end().trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}
