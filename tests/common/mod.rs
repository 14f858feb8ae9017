#![allow(dead_code)]

use plantops::auth::{self, SignUpForm, UserProfile};
use plantops::mailer::Outbox;
use plantops::store::Database;

pub const PASSWORD: &str = "furnace42";

/// The code that follows "code is: " in a mailed message.
pub fn code_in(body: &str) -> String {
    body.split("code is: ")
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .map(|code| code.trim().to_string())
        .expect("message carries a code")
}

pub fn signup_form(employee_id: &str, email: &str, role: &str) -> SignUpForm {
    SignUpForm {
        employee_id: employee_id.to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        confirm_password: PASSWORD.to_string(),
        role: role.to_string(),
    }
}

/// Register an account and confirm it with the mailed code.
pub fn confirmed_user(db: &Database, outbox: &Outbox, email: &str, role: &str) -> UserProfile {
    let employee_id = format!("EMP-{}", email.split('@').next().unwrap_or(email));
    let profile = auth::register_user(db, outbox, &signup_form(&employee_id, email, role))
        .expect("signup succeeds");
    let mail = outbox.last_to(email).expect("confirmation mailed");
    auth::confirm_email(db, email, &code_in(&mail.body)).expect("code accepted");
    profile
}
