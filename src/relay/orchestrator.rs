//! Retry orchestration
//!
//! Drives one inbound request: pick a channel through the token's group
//! chain, attempt it, and on failure classify, cool down, reselect among the
//! channels not tried yet and attempt again. The loop ends on success, on a
//! fatal verdict, when the retry budget or the candidates run out, or when
//! the wall-clock ceiling is crossed.
//!
//! Every attempt is billed on its own: quota is reserved before the upstream
//! call and either charged for the tokens produced or refunded in full.

use std::sync::Arc;

use tracing::{debug, error, info_span, warn, Instrument};

use crate::{
    billing::{QuotaLedger, QuotaRequest, Usage},
    channel::{Channel, ChannelFilter, ChannelId, ChannelRegistry, RoutingError},
    config::RetryOptions,
    control::TokenInfo,
    error::AppError,
    session::{SessionContext, SessionKeyRegistry},
    tokens::SharedTokenCounter,
};

use super::{
    classifier::{classify, ClassifyContext, FatalKind, Verdict},
    disable::AutoDisabler,
    events::{RetryEvent, RetryTrace},
    provider::{Completion, Provider, RelayRequest, ResponseSink, UpstreamError},
    sanitize::{sanitize, SanitizeContext, RETRY_TIMEOUT_MESSAGE},
    state::RetryState,
};

/// Why a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Rejected by the gateway before or during the first attempt
    Local,
    /// A failure the classifier does not retry
    Fatal(FatalKind),
    /// Retry budget or candidate channels ran out
    Exhausted,
    /// Wall-clock ceiling crossed
    Timeout,
    /// No channel could be selected at all
    NoChannel,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Local => "local",
            FailureReason::Fatal(kind) => kind.as_str(),
            FailureReason::Exhausted => "exhausted",
            FailureReason::Timeout => "timeout",
            FailureReason::NoChannel => "no_channel",
        }
    }
}

/// Terminal failure of a request
#[derive(Debug)]
pub struct RelayFailure {
    pub reason: FailureReason,
    /// Sanitized error for the caller
    pub error: AppError,
    /// Error as the last attempt reported it
    pub upstream: UpstreamError,
}

/// Everything the caller needs after a request finished
#[derive(Debug)]
pub struct RelayOutcome {
    pub result: Result<Completion, RelayFailure>,
    /// Channels attempted, in order
    pub attempts: Vec<ChannelId>,
    pub events: Vec<RetryEvent>,
}

impl RelayOutcome {
    /// Channel that served the final attempt
    pub fn last_channel(&self) -> Option<ChannelId> {
        self.attempts.last().copied()
    }
}

/// Where a request is routed
struct Route {
    group: String,
    model: String,
    channel: Arc<Channel>,
}

pub struct RetryOrchestrator {
    registry: Arc<ChannelRegistry>,
    provider: Arc<dyn Provider>,
    ledger: Arc<dyn QuotaLedger>,
    disabler: Arc<AutoDisabler>,
    tokens: SharedTokenCounter,
    sessions: SessionKeyRegistry,
    options: RetryOptions,
}

impl RetryOrchestrator {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        provider: Arc<dyn Provider>,
        ledger: Arc<dyn QuotaLedger>,
        disabler: Arc<AutoDisabler>,
        tokens: SharedTokenCounter,
        sessions: SessionKeyRegistry,
        options: RetryOptions,
    ) -> Self {
        Self {
            registry,
            provider,
            ledger,
            disabler,
            tokens,
            sessions,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Filters every selection of this request starts from
    fn base_filters(&self, token: &TokenInfo, request: &RelayRequest, model: &str) -> Vec<ChannelFilter> {
        let mut filters = Vec::new();
        if !request.endpoint.is_chat() {
            filters.push(ChannelFilter::SkipOnlyChat);
        }
        if !token.allowed_channel_types.is_empty() {
            filters.push(ChannelFilter::AllowTypes(token.allowed_channel_types.clone()));
        }
        if request.stream {
            filters.push(ChannelFilter::StreamCapable(model.to_string()));
        }
        filters
    }

    /// Walk the group chain until a group both serves the model and yields a channel
    async fn select(
        &self,
        chain: &[String],
        token: &TokenInfo,
        request: &RelayRequest,
        extra: Option<ChannelFilter>,
        session: Option<&SessionContext>,
    ) -> Result<Route, RoutingError> {
        let mut last_error = None;

        for group in chain {
            let model = match self.registry.matched_model_name(group, &request.model) {
                Ok(model) => model,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            let mut filters = self.base_filters(token, request, &model);
            filters.extend(extra.clone());

            match self
                .registry
                .next_by_validated_model(group, &model, &filters, session)
                .await
            {
                Ok(channel) => {
                    return Ok(Route {
                        group: group.clone(),
                        model,
                        channel,
                    })
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RoutingError::NoChannel {
            group: String::new(),
            model: request.model.clone(),
        }))
    }

    /// Channel the token is pinned to; must exist and be enabled
    async fn pinned_route(&self, chain: &[String], channel_id: ChannelId, request: &RelayRequest) -> Result<Route, UpstreamError> {
        let channel = match self.registry.store().get_channel_by_id(channel_id).await {
            Ok(Some(channel)) if channel.is_enabled() => channel,
            Ok(_) => {
                return Err(UpstreamError::local(
                    403,
                    format!("specified channel {} is unavailable", channel_id),
                ))
            }
            Err(e) => {
                error!(channel_id, error = %e, "Failed to load pinned channel");
                return Err(UpstreamError::local(503, "failed to load specified channel"));
            }
        };

        Ok(Route {
            group: chain.first().cloned().unwrap_or_default(),
            model: request.model.clone(),
            channel: Arc::new(channel),
        })
    }

    /// One billed attempt against one channel
    async fn attempt(
        &self,
        token: &TokenInfo,
        route: &Route,
        request: &RelayRequest,
        prompt_tokens: u32,
        sink: &ResponseSink,
    ) -> Result<Completion, UpstreamError> {
        let ticket = self
            .ledger
            .pre_consume(&QuotaRequest {
                token_id: token.id,
                user_id: token.user_id,
                channel_id: route.channel.id,
                group: route.group.clone(),
                model: route.model.clone(),
                prompt_tokens,
            })
            .await
            .map_err(|e| {
                let status = e.status().as_u16();
                UpstreamError::local(status, e.to_string())
            })?;

        let result = self.provider.send(&route.channel, request, sink).await;

        let (reported, text) = match &result {
            Ok(completion) => (completion.usage, completion.output_text.as_str()),
            Err(err) => (err.usage, err.output_text.as_str()),
        };
        let usage = self.final_usage(&request.model, prompt_tokens, reported, text);

        let settled = match &result {
            Err(_) if usage.completion_tokens == 0 => self.ledger.undo(ticket).await,
            _ => {
                metrics::counter!("relaygate_tokens_processed_total", "model" => route.model.clone())
                    .increment(u64::from(usage.total_tokens));
                self.ledger.consume(ticket, &usage, request.stream).await
            }
        };
        if let Err(e) = settled {
            error!(channel_id = route.channel.id, error = %e, "Failed to settle quota");
        }

        if result.is_ok() {
            self.disabler.record_success(route.channel.id);
        }
        result
    }

    /// Usage to bill: reported figures, completed by local estimates
    fn final_usage(&self, model: &str, prompt_tokens: u32, reported: Option<Usage>, text: &str) -> Usage {
        let reported = reported.unwrap_or_default();
        let prompt = if reported.prompt_tokens > 0 {
            reported.prompt_tokens
        } else {
            prompt_tokens
        };
        let completion = if reported.completion_tokens == 0 && !text.is_empty() {
            self.tokens
                .estimate_completion_tokens(model, text)
                .unwrap_or_default()
        } else {
            reported.completion_tokens
        };
        Usage::new(prompt, completion)
    }

    fn failure(
        &self,
        reason: FailureReason,
        upstream: UpstreamError,
        request: &RelayRequest,
        state: Option<&RetryState>,
        session_affine: bool,
    ) -> RelayFailure {
        if self.options.log_raw_errors {
            warn!(
                request_id = %request.request_id,
                status = upstream.status,
                error_type = %upstream.error_type,
                message = %upstream.message,
                "Raw upstream error"
            );
        }
        let ctx = SanitizeContext {
            request_id: &request.request_id,
            first_non_auth_error: state.and_then(RetryState::first_non_auth_error),
            session_affine,
        };
        RelayFailure {
            reason,
            error: sanitize(&upstream, &ctx),
            upstream,
        }
    }

    /// Relay one request with failover
    pub async fn relay(
        &self,
        token: &TokenInfo,
        request: &RelayRequest,
        session: Option<&SessionContext>,
        sink: &ResponseSink,
    ) -> RelayOutcome {
        let span = info_span!(
            "relay",
            request_id = %request.request_id,
            model = %request.model,
            endpoint = request.endpoint.as_str(),
            stream = request.stream,
        );
        self.relay_inner(token, request, session, sink)
            .instrument(span)
            .await
    }

    async fn relay_inner(
        &self,
        token: &TokenInfo,
        request: &RelayRequest,
        session: Option<&SessionContext>,
        sink: &ResponseSink,
    ) -> RelayOutcome {
        let mut state = RetryState::new(self.options.timeout);
        let chain = token.group_chain();
        let mut trace = RetryTrace::new(
            request.request_id.clone(),
            request.model.clone(),
            chain.first().cloned().unwrap_or_default(),
        );
        let mut attempts = Vec::new();

        macro_rules! finish {
            ($result:expr) => {
                return RelayOutcome {
                    result: $result,
                    attempts,
                    events: trace.into_events(),
                }
            };
        }

        if request.model.is_empty() {
            let err = UpstreamError::local(400, "model is required");
            finish!(Err(self.failure(FailureReason::Local, err, request, None, false)));
        }
        if !token.allows_model(&request.model) {
            let err = UpstreamError::local(
                403,
                format!("this token is not allowed to use model {}", request.model),
            );
            finish!(Err(self.failure(FailureReason::Local, err, request, None, false)));
        }

        let prompt_tokens = match self.tokens.estimate_prompt_tokens(&request.model, &request.body) {
            Ok(tokens) => tokens,
            Err(e) => {
                let err = UpstreamError::local(400, format!("token_error: {}", e));
                finish!(Err(self.failure(FailureReason::Local, err, request, None, false)));
            }
        };

        let pinned = token.pinned_channel();
        let route = match pinned {
            Some(channel_id) => match self.pinned_route(&chain, channel_id, request).await {
                Ok(route) => route,
                Err(err) => finish!(Err(self.failure(FailureReason::Local, err, request, None, false))),
            },
            None => match self.select(&chain, token, request, None, session).await {
                Ok(route) => route,
                Err(e) => {
                    trace.retry_skip(0, 503, "no_available_channel");
                    let err = UpstreamError::local(503, e.to_string());
                    finish!(Err(self.failure(FailureReason::NoChannel, err, request, None, false)));
                }
            },
        };
        trace.group = route.group.clone();
        trace.model = route.model.clone();

        let Route {
            group,
            mut model,
            mut channel,
        } = route;

        attempts.push(channel.id);
        let first = self
            .attempt(
                token,
                &Route {
                    group: group.clone(),
                    model: model.clone(),
                    channel: channel.clone(),
                },
                request,
                prompt_tokens,
                sink,
            )
            .await;
        let mut last_err = match first {
            Ok(completion) => finish!(Ok(completion)),
            Err(err) => err,
        };

        self.disabler
            .spawn_evaluation(channel.clone(), last_err.clone());

        let classify_ctx = |now: i64| ClassifyContext {
            pinned: pinned.is_some(),
            default_cooldown_seconds: self.registry.cooldowns().default_seconds(),
            now,
        };

        let total = self.registry.count_available_channels(&group, &model, &[]);
        state.freeze_budget(self.options.max_retries, total);
        let mut verdict = classify(&last_err, &classify_ctx(chrono::Utc::now().timestamp()));

        match verdict {
            Verdict::Fatal(kind) => {
                trace.set_budget(0, total);
                trace.retry_skip(channel.id, last_err.status, kind.as_str());
                state.cancel_retries();
            }
            Verdict::Retry { .. } if state.budget == 0 => {
                trace.set_budget(0, total);
                trace.retry_skip(channel.id, last_err.status, "no_available_channels");
            }
            Verdict::Retry { .. } => trace.set_budget(state.budget, total),
        }
        trace.retry_start(channel.id, last_err.status, &last_err.message);
        state.remember_failure(&last_err);

        let mut reason = None;
        loop {
            let cooldown_applied = self.after_failure(&mut trace, &mut state, &channel, &model, &last_err, verdict);

            if let Verdict::Fatal(kind) = verdict {
                if state.attempt > 1 {
                    trace.retry_stop_condition(channel.id, state.attempt, kind.as_str());
                }
                reason = Some(if last_err.is_local && state.attempt == 1 {
                    FailureReason::Local
                } else {
                    FailureReason::Fatal(kind)
                });
                break;
            }

            if state.timed_out() {
                trace.retry_timeout(channel.id, state.timeout().as_millis());
                last_err = UpstreamError::local(429, RETRY_TIMEOUT_MESSAGE).with_type("system_error");
                reason = Some(FailureReason::Timeout);
                break;
            }

            if state.retries_left() == 0 {
                break;
            }

            // Retries stay in the group the request was routed to
            let next = match self
                .select(std::slice::from_ref(&group), token, request, Some(state.skip_filter()), session)
                .await
            {
                Ok(next) => next,
                Err(e) => {
                    debug!(error = %e, "No channel left to retry on");
                    break;
                }
            };

            channel = next.channel.clone();
            model = next.model.clone();
            state.attempt += 1;
            attempts.push(channel.id);

            let mut remaining_filters = self.base_filters(token, request, &next.model);
            remaining_filters.push(state.skip_filter());
            let remaining = self
                .registry
                .count_available_channels(&next.group, &next.model, &remaining_filters);
            trace.retry_attempt(channel.id, state.attempt, remaining, cooldown_applied);

            match self.attempt(token, &next, request, prompt_tokens, sink).await {
                Ok(completion) => {
                    trace.retry_success(channel.id, state.attempt);
                    finish!(Ok(completion));
                }
                Err(err) => {
                    trace.retry_failed(channel.id, state.attempt, err.status, &err.error_type, &err.message);
                    state.remember_failure(&err);
                    self.disabler.spawn_evaluation(channel.clone(), err.clone());
                    verdict = classify(&err, &classify_ctx(chrono::Utc::now().timestamp()));
                    last_err = err;
                }
            }
        }

        let reason = reason.unwrap_or(FailureReason::Exhausted);
        trace.retry_exhausted(channel.id, state.attempt, last_err.status, &last_err.message);

        let affine = self.sessions.is_affine(channel.channel_type);
        let failure = self.failure(reason, last_err, request, Some(&state), affine);
        finish!(Err(failure))
    }

    /// Bookkeeping after every failed attempt: cooldown and skip-list
    fn after_failure(
        &self,
        trace: &mut RetryTrace,
        state: &mut RetryState,
        channel: &Channel,
        model: &str,
        err: &UpstreamError,
        verdict: Verdict,
    ) -> bool {
        let mut applied = false;
        if let Verdict::Retry {
            cooldown_seconds: Some(seconds),
        } = verdict
        {
            if self
                .registry
                .cooldowns()
                .set_cooldown_with_duration(channel.id, model, seconds)
            {
                trace.channel_cooldown(channel.id, seconds, err.rate_limit_reset_at);
                applied = true;
            }
        }
        state.mark_tried(channel.id);
        applied
    }
}
