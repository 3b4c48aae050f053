//! Credential get/set jobs.

use tracing::{debug, warn};
use vault_common::{VaultError, MAX_DESCRIPTION_LENGTH};
use vault_proto::CommandId;

use crate::jobs::{Job, JobCtx, SubCommand};
use crate::ops::{context_bytes, fire, shared, Completion, Credential};

/// Splices context creation in front of the remaining sub-commands:
/// add the context, then select it again.
pub(crate) fn splice_add_context(ctx: &mut JobCtx<'_>, service: &str, data_context: bool) {
    let add_cmd = if data_context {
        CommandId::AddDataService
    } else {
        CommandId::AddContext
    };
    let select_cmd = if data_context {
        CommandId::SetDataService
    } else {
        CommandId::Context
    };
    let payload = context_bytes(service);

    let added = service.to_string();
    ctx.prepend(
        SubCommand::new(add_cmd)
            .payload(payload.clone())
            .check(move |ctx, reply| {
                if !reply.is_ack() {
                    warn!(service = %added, "failed to add context");
                    ctx.set_error(VaultError::refused("context creation"));
                    return false;
                }
                debug!(service = %added, "context added");
                true
            }),
    );
    let selected = service.to_string();
    ctx.insert_after(
        0,
        SubCommand::new(select_cmd)
            .payload(payload)
            .check(move |ctx, reply| {
                if !reply.is_ack() {
                    warn!(service = %selected, "failed to select the new context");
                    ctx.set_error(VaultError::refused("context selection after creation"));
                    return false;
                }
                debug!(service = %selected, "context selected");
                true
            }),
    );
}

/// Builds the credential retrieval job.
///
/// Selects the service context (falling back to `fallback_service` when
/// given), reads the login, the description (tolerantly), and finally
/// the password, which the device may refuse after prompting the user.
pub fn get_credential_job(
    service: String,
    login: String,
    fallback_service: String,
    reqid: &str,
    cb: Completion<Credential>,
) -> Job {
    let mut job = Job::new(format!(
        "get credential for service: {service} login: {login} fallback: {fallback_service}"
    ))
    .with_request_id(reqid);

    let svc = service.clone();
    job.append(
        SubCommand::new(CommandId::Context)
            .payload(context_bytes(&service))
            .check(move |ctx, reply| {
                if !reply.is_ack() {
                    if !fallback_service.is_empty() {
                        let fb = fallback_service.clone();
                        ctx.prepend(
                            SubCommand::new(CommandId::Context)
                                .payload(context_bytes(&fallback_service))
                                .check(move |ctx, reply| {
                                    if !reply.is_ack() {
                                        ctx.set_error(VaultError::refused(
                                            "context selection (fallback included)",
                                        ));
                                        return false;
                                    }
                                    ctx.set_str("service", &fb);
                                    true
                                }),
                        );
                        return true;
                    }
                    ctx.set_error(VaultError::refused("context selection"));
                    return false;
                }
                ctx.set_str("service", &svc);
                true
            }),
    );

    let wanted = login.clone();
    job.append(SubCommand::new(CommandId::GetLogin).check(move |ctx, reply| {
        if reply.first_payload_byte() == 0 && !wanted.is_empty() {
            ctx.set_error(VaultError::refused("credential access"));
            return false;
        }
        let found = reply.payload_string();
        if !wanted.is_empty() && found != wanted {
            ctx.set_error(VaultError::input_invalid("login mismatch"));
            return false;
        }
        ctx.set_str("login", &found);
        true
    }));

    job.append(SubCommand::new(CommandId::GetDescription).check(|ctx, reply| {
        if reply.first_payload_byte() == 0 {
            // Absence of a description is not fatal.
            warn!("failed to query the description, continuing");
            return true;
        }
        let description = reply.payload_string();
        ctx.set_str("description", &description);
        true
    }));

    job.append(SubCommand::new(CommandId::GetPassword).check(|ctx, reply| {
        if reply.first_payload_byte() == 0 {
            ctx.set_error(VaultError::refused("password query"));
            return false;
        }
        true
    }));

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |_, reply, user_data| {
        let get = |key: &str| {
            user_data
                .get(key)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        };
        fire(
            &done,
            Ok(Credential {
                service: get("service"),
                login: get("login"),
                password: reply.payload_string(),
                description: get("description"),
            }),
        );
    });
    job.on_failed(move |_, err| fire(&failed, Err(err)));
    job
}

/// Builds the credential store job.
///
/// Creates the context when missing, sets the login, optionally the
/// description (firmware 1.2+), then only rewrites the password when the
/// device reports it changed.
pub fn set_credential_job(
    service: String,
    login: String,
    password: String,
    description: String,
    set_description: bool,
    fw_1_2: bool,
    cb: Completion<()>,
) -> Job {
    let mut job = Job::new(format!(
        "store credential for service: {service} login: {login}"
    ));

    let svc = service.clone();
    job.append(
        SubCommand::new(CommandId::Context)
            .payload(context_bytes(&service))
            .check(move |ctx, reply| {
                if !reply.is_ack() {
                    warn!(service = %svc, "context does not exist, creating it");
                    splice_add_context(ctx, &svc, false);
                } else {
                    debug!(service = %svc, "context selected");
                }
                true
            }),
    );

    job.append(
        SubCommand::new(CommandId::SetLogin)
            .payload(context_bytes(&login))
            .check(|ctx, reply| {
                if reply.first_payload_byte() == 0 {
                    ctx.set_error(VaultError::refused("login store"));
                    return false;
                }
                true
            }),
    );

    if fw_1_2 && set_description {
        let desc = description.clone();
        job.append(
            SubCommand::new(CommandId::SetDescription)
                .payload(context_bytes(&description))
                .check(move |ctx, reply| {
                    if reply.first_payload_byte() == 0 {
                        if desc.len() > MAX_DESCRIPTION_LENGTH {
                            ctx.set_error(VaultError::input_invalid(format!(
                                "description exceeds {MAX_DESCRIPTION_LENGTH} characters"
                            )));
                        } else {
                            ctx.set_error(VaultError::refused("description store"));
                        }
                        return false;
                    }
                    true
                }),
        );
    }

    if !password.is_empty() {
        let pdata = context_bytes(&password);
        job.append(
            SubCommand::new(CommandId::CheckPassword)
                .payload(pdata.clone())
                .check(move |ctx, reply| {
                    if !reply.is_ack() {
                        // Password differs: rewrite it.
                        ctx.prepend(
                            SubCommand::new(CommandId::SetPassword)
                                .payload(pdata.clone())
                                .check(|ctx, reply| {
                                    if reply.first_payload_byte() == 0 {
                                        ctx.set_error(VaultError::refused("password store"));
                                        return false;
                                    }
                                    debug!("password stored");
                                    true
                                }),
                        );
                    } else {
                        debug!("password unchanged");
                    }
                    true
                }),
        );
    }

    let done = shared(cb);
    let failed = done.clone();
    job.on_finished(move |_, _, _| fire(&done, Ok(())));
    job.on_failed(move |_, err| fire(&failed, Err(err)));
    job
}
