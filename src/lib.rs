/*!
# RINL Plant Operations

A web dashboard for the operations staff of a steel plant, built in Rust.

## Overview

The server keeps the plant's inventory, shift production figures, material
requests and vendor orders in a set of JSON tables, and serves a single
page shell that talks to a JSON API. Staff sign up with a confirmed email
address; vendors buy catalog products through a cart and a simulated card
gateway that mails a one-time code before an order is placed.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, plain JavaScript
- One page shell served for every dashboard route
- Charts are rendered on the server and fetched as PNG images

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Auth - Sign up, email confirmation, cookie sessions, session log
  - Inventory - Stock items with a status set by staff
  - Production - Shift records and the overview computed from them
  - Materials - Requests that move forward through a fixed status chain
  - Checkout - Cart and the Browsing → Payment → OTP → Success flow
  - Payment - Gateway trait, simulated gateway and signed webhooks
  - Chatbot - Operations assistant over a chat-completions API

### Data Persistence Layer
- One pretty-printed JSON file per table, replaced atomically on write
- Unique keys checked on insert; batch inserts are all-or-nothing
- CSV and XLSX inventory export

## Modules

- **store**: Tables, queries, unique keys, session log
- **config**: Runtime configuration from `PLANTOPS_*` variables
- **auth**: Accounts, confirmation codes, sessions and the auth middleware
- **mailer**: Notifier trait with SMTP and in-memory transports
- **catalog**: Vendors and products offered for purchase
- **inventory**, **production**, **materials**: Dashboard data
- **checkout**, **payment**, **vendor**: Cart, gateway and order placement
- **downloader**: Inventory export (CSV, XLSX)
- **graph**: Production charts
- **chatbot**: Assistant client
- **error**: Errors returned to API callers
- **app**: Routing and middleware

## REST API Endpoints

- `/api/auth/{signup,confirm,resend,login,logout,session}` - Account flow
- `/api/inventory`, `/api/inventory/{id}` - List, add, update stock
- `/api/production`, `/api/production/overview` - Shift data
- `/api/materials`, `/api/materials/track/{request_id}` - Requests
- `/api/checkout/...`, `/api/orders` - Purchase flow and history
- `/api/payments/webhook` - Signed gateway callbacks
- `/api/chat` - Assistant
*/

pub mod auth;
pub mod catalog;
pub mod chatbot;
pub mod checkout;
pub mod config;
pub mod downloader;
pub mod error;
pub mod inventory;
pub mod mailer;
pub mod materials;
pub mod payment;
pub mod production;
pub mod store;
pub mod vendor;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

pub use auth::{AuthError, AuthState, Role, Session};
pub use checkout::{Cart, CartItem, Checkout, CheckoutError, Stage};
pub use config::AppConfig;
pub use error::AppError;
pub use mailer::{Notifier, Outbox};
pub use payment::{PaymentGateway, SimulatedGateway};
pub use store::{Database, StoreError};
