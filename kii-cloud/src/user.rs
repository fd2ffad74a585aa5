//! Application users, sign-in and account maintenance.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info};

use kii_types::{validate_bucket_name, EntityId, EntityKind, ObjectUri, Scope};

use crate::bucket::KiiBucket;
use crate::client::KiiClient;
use crate::entity::{refresh_fields, save_fields, Entity, EntityCore, Fields};
use crate::error::{KiiError, KiiResult};
use crate::file_bucket::KiiFileBucket;
use crate::group::KiiGroup;
use crate::hydrate::{bool_field, string_field, ServerMetadata};
use crate::invocation::Remote;
use crate::session::AuthState;
use crate::transport::{ApiRequest, Auth, HttpMethod};

const LOGIN_NAME: &str = "loginName";
const EMAIL: &str = "emailAddress";
const PHONE: &str = "phoneNumber";
const DISPLAY_NAME: &str = "displayName";
const COUNTRY: &str = "country";
const PASSWORD: &str = "password";
const EMAIL_VERIFIED: &str = "emailAddressVerified";
const PHONE_VERIFIED: &str = "phoneNumberVerified";
const INTERNAL_ID: &str = "internalUserID";

const REGISTRATION_REQUEST: &str = "application/vnd.kii.RegistrationRequest+json";
const USER_UPDATE_REQUEST: &str = "application/vnd.kii.UserUpdateRequest+json";
const CHANGE_PASSWORD_REQUEST: &str = "application/vnd.kii.ChangePasswordRequest+json";
const VERIFICATION_REQUEST: &str = "application/vnd.kii.AddressVerificationRequest+json";
const EMAIL_CHANGE_REQUEST: &str = "application/vnd.kii.EmailAddressModificationRequest+json";
const PHONE_CHANGE_REQUEST: &str = "application/vnd.kii.PhoneNumberModificationRequest+json";

/// Checks a login name: 3 to 64 characters of `[A-Za-z0-9._-]`.
pub fn validate_username(username: &str) -> KiiResult<()> {
    let len = username.chars().count();
    if !(3..=64).contains(&len) {
        return Err(KiiError::Validation(format!(
            "username must be 3 to 64 characters, got {len}"
        )));
    }
    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(KiiError::Validation(format!("username contains {c:?}")));
    }
    Ok(())
}

/// Checks a password: 4 to 50 printable ASCII characters.
pub fn validate_password(password: &str) -> KiiResult<()> {
    let len = password.chars().count();
    if !(4..=50).contains(&len) {
        return Err(KiiError::Validation(format!(
            "password must be 4 to 50 characters, got {len}"
        )));
    }
    if !password.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Err(KiiError::Validation(
            "password must be printable ASCII".into(),
        ));
    }
    Ok(())
}

/// Checks an email address has exactly one `@` with text on both sides.
pub fn validate_email(email: &str) -> KiiResult<()> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(KiiError::Validation(format!("invalid email address: {email:?}"))),
    }
}

/// Checks a phone number: a leading `+` and 7 to 15 digits. Spaces and
/// dashes between digits are tolerated.
pub fn validate_phone(phone: &str) -> KiiResult<()> {
    let invalid = || KiiError::Validation(format!("invalid phone number: {phone:?}"));
    let rest = phone.strip_prefix('+').ok_or_else(invalid)?;
    if !rest.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-') {
        return Err(invalid());
    }
    let digits = rest.chars().filter(char::is_ascii_digit).count();
    if !(7..=15).contains(&digits) {
        return Err(invalid());
    }
    Ok(())
}

/// An application user.
#[derive(Clone)]
pub struct KiiUser {
    client: KiiClient,
    core: EntityCore,
    password: Option<String>,
    email_verified: bool,
    phone_verified: bool,
    access_token: Option<String>,
}

impl KiiUser {
    fn new(client: KiiClient) -> Self {
        Self {
            client,
            core: EntityCore::new(EntityKind::User),
            password: None,
            email_verified: false,
            phone_verified: false,
            access_token: None,
        }
    }

    fn unregistered(client: KiiClient, identity: &[(&str, &str)], password: &str) -> KiiResult<Self> {
        validate_password(password)?;
        let mut user = Self::new(client);
        for (key, value) in identity {
            user.core.put(key, json!(value));
        }
        user.password = Some(password.to_string());
        Ok(user)
    }

    pub(crate) fn with_id(client: KiiClient, id: EntityId) -> Self {
        let mut user = Self::new(client);
        user.core = EntityCore::with_id(EntityKind::User, id);
        user
    }

    pub(crate) fn from_remote(client: KiiClient, body: &Value) -> Self {
        let mut user = Self::new(client);
        user.apply_remote(body);
        user
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.core.get(key).and_then(Value::as_str)
    }

    pub fn username(&self) -> Option<&str> {
        self.text(LOGIN_NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.text(EMAIL)
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.text(PHONE)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.text(DISPLAY_NAME)
    }

    pub fn set_display_name(&mut self, name: &str) -> KiiResult<()> {
        self.core.ensure_live()?;
        let len = name.chars().count();
        if !(1..=50).contains(&len) {
            return Err(KiiError::Validation(format!(
                "display name must be 1 to 50 characters, got {len}"
            )));
        }
        self.core.put(DISPLAY_NAME, json!(name));
        Ok(())
    }

    pub fn country(&self) -> Option<&str> {
        self.text(COUNTRY)
    }

    /// Sets the ISO 3166-1 alpha-2 country code, e.g. `JP`.
    pub fn set_country(&mut self, country: &str) -> KiiResult<()> {
        self.core.ensure_live()?;
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(KiiError::Validation(format!("invalid country code: {country:?}")));
        }
        self.core.put(COUNTRY, json!(country));
        Ok(())
    }

    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    pub fn phone_verified(&self) -> bool {
        self.phone_verified
    }

    /// Access token; set only on the user returned by a sign-in.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    fn users_path(&self) -> String {
        format!("/apps/{}/users", self.client.app_id())
    }

    /// Registers this user on the server. The user must be local.
    pub async fn perform_registration(&mut self) -> KiiResult<()> {
        self.core.ensure_live()?;
        if self.core.uuid().is_some() {
            return Err(KiiError::Precondition("user is already registered".into()));
        }
        self.save().await
    }

    pub async fn update_password(&mut self, from: &str, to: &str) -> KiiResult<()> {
        let id = self.core.require_id("change the password of")?.clone();
        validate_password(from)?;
        validate_password(to)?;
        let request = ApiRequest::json(
            HttpMethod::Put,
            format!("{}/password", self.resource_path(&id)),
            json!({ "oldPassword": from, "newPassword": to }),
        )
        .with_content_type(CHANGE_PASSWORD_REQUEST);
        self.client.send(request).await?;
        info!(%id, "password changed");
        Ok(())
    }

    /// Confirms the phone number with the code sent by SMS.
    pub async fn verify_phone_number(&mut self, code: &str) -> KiiResult<()> {
        let id = self.core.require_id("verify the phone number of")?.clone();
        if code.trim().is_empty() {
            return Err(KiiError::Validation("verification code must not be empty".into()));
        }
        let request = ApiRequest::json(
            HttpMethod::Post,
            format!("{}/phone-number/verify", self.resource_path(&id)),
            json!({ "verificationCode": code }),
        )
        .with_content_type(VERIFICATION_REQUEST);
        self.client.send(request).await?;
        self.phone_verified = true;
        info!(%id, "phone number verified");
        Ok(())
    }

    pub async fn resend_email_verification(&mut self) -> KiiResult<()> {
        let id = self.core.require_id("resend the email verification of")?.clone();
        let path = format!("{}/email-address/resend-verification", self.resource_path(&id));
        self.client.send(ApiRequest::new(HttpMethod::Post, path)).await?;
        debug!(%id, "email verification resent");
        Ok(())
    }

    pub async fn resend_phone_number_verification(&mut self) -> KiiResult<()> {
        let id = self.core.require_id("resend the phone verification of")?.clone();
        let path = format!("{}/phone-number/resend-verification", self.resource_path(&id));
        self.client.send(ApiRequest::new(HttpMethod::Post, path)).await?;
        debug!(%id, "phone verification resent");
        Ok(())
    }

    /// Groups this user belongs to.
    pub async fn member_of_groups(&mut self) -> KiiResult<Vec<KiiGroup>> {
        let id = self.core.require_id("list the groups of")?.clone();
        let path = format!(
            "/apps/{}/groups?is_member={}",
            self.client.app_id(),
            urlencoding::encode(id.as_str())
        );
        let body = self.client.send_json(ApiRequest::get(path)).await?;
        let groups = body
            .get("groups")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .map(|g| KiiGroup::from_remote(self.client.clone(), g))
                    .collect()
            })
            .unwrap_or_default();
        Ok(groups)
    }

    /// Replaces the email address. The new address starts unverified.
    pub async fn change_email(&mut self, email: &str) -> KiiResult<()> {
        let id = self.core.require_id("change the email of")?.clone();
        validate_email(email)?;
        let request = ApiRequest::json(
            HttpMethod::Put,
            format!("{}/email-address", self.resource_path(&id)),
            json!({ "emailAddress": email }),
        )
        .with_content_type(EMAIL_CHANGE_REQUEST);
        self.client.send(request).await?;
        self.core.put_synced(EMAIL, json!(email));
        self.email_verified = false;
        info!(%id, "email address changed");
        Ok(())
    }

    /// Replaces the phone number. The new number starts unverified.
    pub async fn change_phone(&mut self, phone: &str) -> KiiResult<()> {
        let id = self.core.require_id("change the phone number of")?.clone();
        validate_phone(phone)?;
        let request = ApiRequest::json(
            HttpMethod::Put,
            format!("{}/phone-number", self.resource_path(&id)),
            json!({ "phoneNumber": phone }),
        )
        .with_content_type(PHONE_CHANGE_REQUEST);
        self.client.send(request).await?;
        self.core.put_synced(PHONE, json!(phone));
        self.phone_verified = false;
        info!(%id, "phone number changed");
        Ok(())
    }

    /// A bucket owned by this user.
    pub fn bucket(&self, name: &str) -> KiiResult<KiiBucket> {
        let id = self.core.require_id("open a bucket of")?;
        validate_bucket_name(name)?;
        Ok(KiiBucket::new(self.client.clone(), Scope::User(id.clone()), name))
    }

    /// A file bucket owned by this user.
    pub fn file_bucket(&self, name: &str) -> KiiResult<KiiFileBucket> {
        let id = self.core.require_id("open a file bucket of")?;
        validate_bucket_name(name)?;
        Ok(KiiFileBucket::new(self.client.clone(), Scope::User(id.clone()), name))
    }

    pub fn perform_registration_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|user| Box::pin(user.perform_registration()))
    }

    pub fn perform_registration_in_background<F>(
        self,
        worker: &tokio::runtime::Handle,
        done: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        self.run_in_background(worker, |user| Box::pin(user.perform_registration()), done)
    }

    pub fn update_password_blocking(&mut self, from: &str, to: &str) -> KiiResult<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.run_blocking(move |user| Box::pin(async move { user.update_password(&from, &to).await }))
    }

    pub fn verify_phone_number_blocking(&mut self, code: &str) -> KiiResult<()> {
        let code = code.to_string();
        self.run_blocking(move |user| Box::pin(async move { user.verify_phone_number(&code).await }))
    }

    pub fn resend_email_verification_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|user| Box::pin(user.resend_email_verification()))
    }

    pub fn resend_phone_number_verification_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|user| Box::pin(user.resend_phone_number_verification()))
    }

    pub fn member_of_groups_blocking(&mut self) -> KiiResult<Vec<KiiGroup>> {
        self.run_blocking(|user| Box::pin(user.member_of_groups()))
    }

    pub fn change_email_blocking(&mut self, email: &str) -> KiiResult<()> {
        let email = email.to_string();
        self.run_blocking(move |user| Box::pin(async move { user.change_email(&email).await }))
    }

    pub fn change_phone_blocking(&mut self, phone: &str) -> KiiResult<()> {
        let phone = phone.to_string();
        self.run_blocking(move |user| Box::pin(async move { user.change_phone(&phone).await }))
    }
}

impl fmt::Debug for KiiUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KiiUser")
            .field("core", &self.core)
            .field("has_password", &self.password.is_some())
            .field("email_verified", &self.email_verified)
            .field("phone_verified", &self.phone_verified)
            .field("signed_in", &self.access_token.is_some())
            .finish()
    }
}

impl Remote for KiiUser {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}

#[async_trait]
impl Entity for KiiUser {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn resource_path(&self, id: &EntityId) -> String {
        format!("{}/{id}", self.users_path())
    }

    fn uri_for(&self, id: &EntityId) -> ObjectUri {
        ObjectUri::User(id.clone())
    }

    fn create_request(&self) -> KiiResult<ApiRequest> {
        let password = self
            .password
            .as_ref()
            .ok_or_else(|| KiiError::Precondition("registration requires a password".into()))?;
        let mut payload = self.core.fields().clone();
        payload.insert(PASSWORD.into(), json!(password));
        Ok(
            ApiRequest::json(HttpMethod::Post, self.users_path(), Value::Object(payload))
                .with_content_type(REGISTRATION_REQUEST)
                .with_auth(Auth::None),
        )
    }

    fn update_request(&self, path: String, delta: serde_json::Map<String, Value>) -> ApiRequest {
        ApiRequest::json(HttpMethod::Post, path, Value::Object(delta))
            .with_content_type(USER_UPDATE_REQUEST)
    }

    fn builtin_keys(&self) -> &'static [&'static str] {
        &[LOGIN_NAME, EMAIL, PHONE, DISPLAY_NAME, COUNTRY, PASSWORD]
    }

    fn read_only_keys(&self) -> &'static [&'static str] {
        &[EMAIL_VERIFIED, PHONE_VERIFIED, INTERNAL_ID]
    }

    fn apply_read_only(&mut self, body: &Value) {
        if let Some(verified) = bool_field(body, EMAIL_VERIFIED) {
            self.email_verified = verified;
        }
        if let Some(verified) = bool_field(body, PHONE_VERIFIED) {
            self.phone_verified = verified;
        }
    }

    fn describe_extra(&self) -> Vec<(&'static str, String)> {
        vec![
            ("email verified", self.email_verified.to_string()),
            ("phone verified", self.phone_verified.to_string()),
            ("signed in", self.access_token.is_some().to_string()),
        ]
    }

    /// Registers a local user, or sends attribute changes. The password is
    /// dropped once registration succeeds.
    async fn save(&mut self) -> KiiResult<()> {
        let registering = self.core.uuid().is_none();
        save_fields(self).await?;
        if registering {
            self.password = None;
            info!(user_id = ?self.core.uuid(), "user registered");
        }
        Ok(())
    }

    async fn refresh(&mut self) -> KiiResult<()> {
        let body = refresh_fields(self).await?;
        if let Some(id) = self.core.uuid() {
            self.client.session().update_user(id, body);
        }
        Ok(())
    }
}

impl Fields for KiiUser {}

impl KiiClient {
    /// A local user identified by login name.
    pub fn user_with_username(&self, username: &str, password: &str) -> KiiResult<KiiUser> {
        validate_username(username)?;
        KiiUser::unregistered(self.clone(), &[(LOGIN_NAME, username)], password)
    }

    /// A local user identified by email address.
    pub fn user_with_email(&self, email: &str, password: &str) -> KiiResult<KiiUser> {
        validate_email(email)?;
        KiiUser::unregistered(self.clone(), &[(EMAIL, email)], password)
    }

    /// A local user identified by phone number.
    pub fn user_with_phone(&self, phone: &str, password: &str) -> KiiResult<KiiUser> {
        validate_phone(phone)?;
        KiiUser::unregistered(self.clone(), &[(PHONE, phone)], password)
    }

    pub fn user_with_username_and_email(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> KiiResult<KiiUser> {
        validate_username(username)?;
        validate_email(email)?;
        KiiUser::unregistered(self.clone(), &[(LOGIN_NAME, username), (EMAIL, email)], password)
    }

    pub fn user_with_username_and_phone(
        &self,
        username: &str,
        phone: &str,
        password: &str,
    ) -> KiiResult<KiiUser> {
        validate_username(username)?;
        validate_phone(phone)?;
        KiiUser::unregistered(self.clone(), &[(LOGIN_NAME, username), (PHONE, phone)], password)
    }

    /// An existing user, addressed by `kiicloud://users/{id}`.
    pub fn user_with_uri(&self, uri: &str) -> KiiResult<KiiUser> {
        match uri.parse::<ObjectUri>()? {
            ObjectUri::User(id) => Ok(KiiUser::with_id(self.clone(), id)),
            other => Err(KiiError::Validation(format!("not a user URI: {other}"))),
        }
    }

    pub fn user_with_id(&self, id: &str) -> KiiResult<KiiUser> {
        Ok(KiiUser::with_id(self.clone(), EntityId::parse(id)?))
    }

    /// Signs in with a login name, email address or phone number.
    ///
    /// On success the session holds the new token and the returned user
    /// carries it too.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> KiiResult<KiiUser> {
        if identifier.trim().is_empty() {
            return Err(KiiError::Validation("identifier must not be empty".into()));
        }
        validate_password(password)?;

        let request = ApiRequest::json(
            HttpMethod::Post,
            "/oauth2/token",
            json!({ "username": identifier, "password": password }),
        )
        .with_auth(Auth::None);
        let body = self.send_json(request).await?;

        let access_token = string_field(&body, "access_token")
            .ok_or_else(|| KiiError::MalformedResponse("token response carries no access_token".into()))?;
        let user_id = string_field(&body, "id").map(|id| EntityId::parse(&id)).transpose()?;
        self.sign_in(user_id, access_token).await
    }

    /// Signs in with an access token obtained earlier.
    pub async fn authenticate_with_token(&self, token: &str) -> KiiResult<KiiUser> {
        if token.trim().is_empty() {
            return Err(KiiError::Validation("access token must not be empty".into()));
        }
        self.sign_in(None, token.to_string()).await
    }

    async fn sign_in(&self, user_id: Option<EntityId>, access_token: String) -> KiiResult<KiiUser> {
        let path = match &user_id {
            Some(id) => format!("/apps/{}/users/{id}", self.app_id()),
            None => format!("/apps/{}/users/me", self.app_id()),
        };
        let request = ApiRequest::get(path).with_auth(Auth::Token(access_token.clone()));
        let body = self.send_json(request).await?;

        let mut user = KiiUser::from_remote(self.clone(), &body);
        if user.core.uuid().is_none() {
            user.core.apply_metadata(&ServerMetadata {
                id: user_id,
                ..Default::default()
            });
        }
        let user_id = user
            .core
            .uuid()
            .cloned()
            .ok_or_else(|| KiiError::MalformedResponse("user response carries no userID".into()))?;
        user.access_token = Some(access_token.clone());

        self.session().begin(AuthState {
            user_id: user_id.clone(),
            access_token,
            user: body,
        })?;
        info!(%user_id, "user signed in");
        Ok(user)
    }

    /// Signs in with the token a [`TokenStore`](crate::TokenStore) kept from
    /// an earlier run. `None` when there is no stored token.
    pub async fn restore_session(&self) -> KiiResult<Option<KiiUser>> {
        match self.session().stored_token()? {
            Some(token) => Ok(Some(self.authenticate_with_token(&token).await?)),
            None => Ok(None),
        }
    }

    /// Signs out. Local only; the token stays valid on the server until it
    /// expires.
    pub fn logout(&self) -> KiiResult<()> {
        self.session().end()?;
        info!("user signed out");
        Ok(())
    }

    pub fn logged_in(&self) -> bool {
        self.session().is_logged_in()
    }

    /// The signed-in user, as last seen by the server.
    pub fn current_user(&self) -> Option<KiiUser> {
        let state = self.session().current()?;
        let mut user = KiiUser::from_remote(self.clone(), &state.user);
        if user.core.uuid().is_none() {
            user.core.apply_metadata(&ServerMetadata {
                id: Some(state.user_id),
                ..Default::default()
            });
        }
        user.access_token = Some(state.access_token);
        Some(user)
    }

    pub fn access_token(&self) -> Option<String> {
        self.session().access_token()
    }

    /// Asks the server to send a password reset to the user's email address
    /// or phone. `identifier` is an email address, a `+` phone number or a
    /// login name.
    pub async fn reset_password(&self, identifier: &str) -> KiiResult<()> {
        let qualified = if identifier.contains('@') {
            validate_email(identifier)?;
            format!("EMAIL:{identifier}")
        } else if identifier.starts_with('+') {
            validate_phone(identifier)?;
            format!("PHONE:{identifier}")
        } else {
            validate_username(identifier)?;
            format!("LOGIN_NAME:{identifier}")
        };
        let path = format!(
            "/apps/{}/users/{}/password/request-reset",
            self.app_id(),
            urlencoding::encode(&qualified)
        );
        self.send(ApiRequest::new(HttpMethod::Post, path).with_auth(Auth::None))
            .await?;
        info!("password reset requested");
        Ok(())
    }

    pub fn authenticate_blocking(&self, identifier: &str, password: &str) -> KiiResult<KiiUser> {
        let (identifier, password) = (identifier.to_string(), password.to_string());
        let mut client = self.clone();
        client.run_blocking(move |c| Box::pin(async move { c.authenticate(&identifier, &password).await }))
    }

    pub fn authenticate_with_token_blocking(&self, token: &str) -> KiiResult<KiiUser> {
        let token = token.to_string();
        let mut client = self.clone();
        client.run_blocking(move |c| Box::pin(async move { c.authenticate_with_token(&token).await }))
    }

    pub fn restore_session_blocking(&self) -> KiiResult<Option<KiiUser>> {
        let mut client = self.clone();
        client.run_blocking(|c| Box::pin(c.restore_session()))
    }

    pub fn reset_password_blocking(&self, identifier: &str) -> KiiResult<()> {
        let identifier = identifier.to_string();
        let mut client = self.clone();
        client.run_blocking(move |c| Box::pin(async move { c.reset_password(&identifier).await }))
    }
}
