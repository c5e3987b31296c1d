// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Endpoint identifiers of the reporting application that the admission
//! engine treats specially.

pub const STATIC: &str = "static";
pub const INDEX: &str = "main.index";
pub const LOGIN: &str = "main.login";
pub const REGISTER: &str = "main.register";
pub const LOGOUT: &str = "main.logout";
pub const VERIFY_2FA: &str = "main.verify_2fa";
pub const REPORT_ISSUE: &str = "main.report_issue";
pub const UPVOTE: &str = "main.upvote";
pub const NOTIFICATIONS: &str = "main.notifications";
pub const REVERSE_GEOCODE: &str = "main.reverse_geocode";
pub const CHECK_DUPLICATES: &str = "main.check_duplicates";
pub const GENERATE_REPORT: &str = "main.generate_report";

/// Successful GETs here are never recorded.
pub const UNTRACKED_PAGES: &[&str] = &[STATIC, INDEX];

/// Always recorded regardless of method or status.
pub const AUTH_FLOW: &[&str] = &[LOGIN, REGISTER, LOGOUT];

/// Rejected attempts here count as credential probing.
pub const CREDENTIAL_CHECKS: &[&str] = &[LOGIN, VERIFY_2FA];

/// Write-heavy endpoints where failures are suspicious.
pub const MUTATING: &[&str] = &[REPORT_ISSUE, UPVOTE];
