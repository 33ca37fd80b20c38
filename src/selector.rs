//! Decides which provider(s) serve a capability.

use crate::{
    config::Config,
    error::{MediaError, Result},
    models::Capability,
    providers::ProviderId,
};

/// Providers to try, in order. Only capabilities with a declared fallback
/// chain ever carry more than the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    pub primary: ProviderId,
    pub fallbacks: Vec<ProviderId>,
}

impl RoutePlan {
    pub fn providers(&self) -> impl Iterator<Item = ProviderId> + '_ {
        std::iter::once(self.primary).chain(self.fallbacks.iter().copied())
    }
}

/// Secondary providers tried when the first attempt fails or is unavailable.
pub fn fallback_chain(capability: Capability) -> &'static [ProviderId] {
    match capability {
        Capability::RemoveBackground => &[ProviderId::Replicate, ProviderId::HuggingFace],
        _ => &[],
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelector {
    default_provider: ProviderId,
    configured_override: Option<ProviderId>,
    available: Vec<ProviderId>,
}

impl ProviderSelector {
    pub fn new(
        default_provider: ProviderId,
        configured_override: Option<ProviderId>,
        available: Vec<ProviderId>,
    ) -> Self {
        Self {
            default_provider,
            configured_override,
            available,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.default_provider,
            config.provider_override,
            config.available_providers(),
        )
    }

    pub fn available(&self) -> &[ProviderId] {
        &self.available
    }

    fn has_credential(&self, provider: ProviderId) -> bool {
        self.available.contains(&provider)
    }

    /// Default provider first, then the fixed priority order.
    fn priority_order(&self) -> impl Iterator<Item = ProviderId> + '_ {
        std::iter::once(self.default_provider).chain(
            ProviderId::ALL
                .into_iter()
                .filter(move |p| *p != self.default_provider),
        )
    }

    fn fallbacks_for(&self, primary: ProviderId, capability: Capability) -> Vec<ProviderId> {
        fallback_chain(capability)
            .iter()
            .copied()
            .filter(|p| *p != primary && self.has_credential(*p) && p.supports(capability))
            .collect()
    }

    /// `requested` (per call) takes precedence over the configured override.
    pub fn resolve(
        &self,
        capability: Capability,
        requested: Option<ProviderId>,
    ) -> Result<RoutePlan> {
        if let Some(provider) = requested.or(self.configured_override) {
            if self.has_credential(provider) {
                return self.resolve_override(provider, capability);
            }
            log::warn!(
                "Provider override '{}' ignored: {} not set",
                provider,
                provider.credential_vars().join(" / ")
            );
        }

        if self.available.is_empty() {
            return Err(MediaError::NoCredentialsAvailable(capability));
        }

        let primary = self
            .priority_order()
            .find(|p| self.has_credential(*p) && p.supports(capability))
            .ok_or_else(|| MediaError::CapabilityUnsupported {
                provider: self
                    .available
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                capability,
            })?;

        Ok(RoutePlan {
            primary,
            fallbacks: self.fallbacks_for(primary, capability),
        })
    }

    fn resolve_override(&self, provider: ProviderId, capability: Capability) -> Result<RoutePlan> {
        if provider.supports(capability) {
            return Ok(RoutePlan {
                primary: provider,
                fallbacks: self.fallbacks_for(provider, capability),
            });
        }

        let mut chain = self.fallbacks_for(provider, capability).into_iter();
        match chain.next() {
            Some(primary) => {
                log::warn!(
                    "{} does not support {}; falling back to {}",
                    provider,
                    capability,
                    primary
                );
                Ok(RoutePlan {
                    primary,
                    fallbacks: chain.collect(),
                })
            }
            None => Err(MediaError::CapabilityUnsupported {
                provider: provider.to_string(),
                capability,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderId::*;

    fn selector(available: &[ProviderId]) -> ProviderSelector {
        ProviderSelector::new(Gemini, None, available.to_vec())
    }

    #[test]
    fn test_default_provider_wins_when_credentialed() {
        let plan = selector(&[Gemini, Replicate, HuggingFace])
            .resolve(Capability::Generate, None)
            .unwrap();
        assert_eq!(plan.primary, Gemini);
        assert!(plan.fallbacks.is_empty());
    }

    #[test]
    fn test_priority_order_without_default_credential() {
        let plan = selector(&[HuggingFace, Replicate])
            .resolve(Capability::Generate, None)
            .unwrap();
        assert_eq!(plan.primary, Replicate);
    }

    #[test]
    fn test_override_honored_with_credential() {
        let plan = selector(&[Gemini, HuggingFace])
            .resolve(Capability::Generate, Some(HuggingFace))
            .unwrap();
        assert_eq!(plan.primary, HuggingFace);
    }

    #[test]
    fn test_override_without_credential_is_ignored() {
        let plan = selector(&[Gemini])
            .resolve(Capability::Generate, Some(Replicate))
            .unwrap();
        assert_eq!(plan.primary, Gemini);
    }

    #[test]
    fn test_configured_override_and_per_call_precedence() {
        let selector = ProviderSelector::new(Gemini, Some(Replicate), vec![Gemini, Replicate]);
        assert_eq!(
            selector.resolve(Capability::Edit, None).unwrap().primary,
            Replicate
        );
        assert_eq!(
            selector.resolve(Capability::Edit, Some(Gemini)).unwrap().primary,
            Gemini
        );
    }

    #[test]
    fn test_override_lacking_capability_without_fallback() {
        let err = selector(&[HuggingFace, Replicate])
            .resolve(Capability::Edit, Some(HuggingFace))
            .unwrap_err();
        match err {
            MediaError::CapabilityUnsupported {
                provider,
                capability,
            } => {
                assert_eq!(provider, "huggingface");
                assert_eq!(capability, Capability::Edit);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_override_lacking_capability_uses_fallback_chain() {
        let plan = selector(&[Gemini, HuggingFace])
            .resolve(Capability::RemoveBackground, Some(Gemini))
            .unwrap();
        assert_eq!(plan.primary, HuggingFace);
        assert!(plan.fallbacks.is_empty());
    }

    #[test]
    fn test_background_removal_plan_includes_fallback() {
        let plan = selector(&[Gemini, Replicate, HuggingFace])
            .resolve(Capability::RemoveBackground, None)
            .unwrap();
        assert_eq!(plan.providers().collect::<Vec<_>>(), vec![Replicate, HuggingFace]);

        let plan = selector(&[Replicate, HuggingFace])
            .resolve(Capability::RemoveBackground, Some(HuggingFace))
            .unwrap();
        assert_eq!(plan.providers().collect::<Vec<_>>(), vec![HuggingFace, Replicate]);
    }

    #[test]
    fn test_no_credentials() {
        assert!(matches!(
            selector(&[]).resolve(Capability::Generate, None),
            Err(MediaError::NoCredentialsAvailable(Capability::Generate))
        ));
    }

    #[test]
    fn test_no_capable_provider() {
        assert!(matches!(
            selector(&[Gemini]).resolve(Capability::GenerateMesh, None),
            Err(MediaError::CapabilityUnsupported { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = Config::new()
            .with_replicate(crate::config::ReplicateConfig::new().with_api_token("r8"))
            .with_provider_override(Replicate);
        let selector = ProviderSelector::from_config(&config);
        assert_eq!(selector.available(), &[Replicate]);
        assert_eq!(
            selector
                .resolve(Capability::GenerateSound, None)
                .unwrap()
                .primary,
            Replicate
        );
    }
}
