//! Wires a correlator to the lifecycle channels of one framework

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::state::{record_anomaly, Correlator};
use crate::channel::{Channel, SubscriptionId};
use crate::error::{ChannelError, CorrelationAnomaly};
use crate::instrument::events::{
    AddTags, ChannelSet, HookError, SessionConfiguration, SessionFinish, SessionStart, SuiteFinish, SuiteStart,
    TestError, TestFinish, TestParameterize, TestSkip, TestStart,
};

/// Subscribes a shared correlator to every channel of a `ChannelSet`.
///
/// Correlation anomalies are logged and counted here; subscribers always
/// return `Ok` so a confused correlator never fails the publisher.
/// Dropping the plugin unsubscribes it.
pub struct TestPlugin {
    correlator: Arc<Mutex<Correlator>>,
    channels: ChannelSet,
    subscriptions: Vec<(Arc<Channel>, SubscriptionId)>,
}

fn lock(correlator: &Mutex<Correlator>) -> MutexGuard<'_, Correlator> {
    correlator.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report<T>(result: Result<T, CorrelationAnomaly>) -> Result<(), ChannelError> {
    if let Err(anomaly) = result {
        record_anomaly(&anomaly);
    }
    Ok(())
}

impl TestPlugin {
    /// Subscribe `correlator` to the channels of its framework
    pub fn configure(correlator: Correlator) -> Self {
        let channels = ChannelSet::new(correlator.framework());
        let mut plugin = Self {
            correlator: Arc::new(Mutex::new(correlator)),
            channels,
            subscriptions: Vec::new(),
        };
        plugin.subscribe_all();
        debug!(framework = %plugin.channels.framework(), "Test plugin configured");
        plugin
    }

    /// Shared handle on the correlator, e.g. to inspect state in tests
    pub fn correlator(&self) -> Arc<Mutex<Correlator>> {
        Arc::clone(&self.correlator)
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    fn add<T, F>(&mut self, channel: &Arc<Channel>, handler: F)
    where
        T: 'static,
        F: Fn(&mut Correlator, &T) -> Result<(), ChannelError> + Send + Sync + 'static,
    {
        let correlator = Arc::clone(&self.correlator);
        let id = channel.subscribe_typed(move |payload: &T| handler(&mut lock(&correlator), payload));
        self.subscriptions.push((Arc::clone(channel), id));
    }

    fn subscribe_all(&mut self) {
        let channels = self.channels.clone();

        self.add(&channels.session_start, |c, e: &SessionStart| report(c.session_start(e)));
        self.add(&channels.session_configuration, |c, e: &SessionConfiguration| {
            report(c.session_configuration(e))
        });
        self.add(&channels.session_finish, |c, e: &SessionFinish| report(c.session_finish(e, None)));
        self.add(&channels.suite_start, |c, e: &SuiteStart| report(c.suite_start(e)));
        self.add(&channels.suite_finish, |c, e: &SuiteFinish| report(c.suite_finish(e)));
        self.add(&channels.test_start, |c, e: &TestStart| report(c.test_start(e)));
        self.add(&channels.test_finish, |c, e: &TestFinish| report(c.test_finish(e)));
        self.add(&channels.test_error, |c, e: &TestError| report(c.test_error(e)));
        self.add(&channels.test_skip, |c, e: &TestSkip| report(c.test_skip(e)));
        self.add(&channels.test_parameterize, |c, e: &TestParameterize| {
            c.test_parameterize(e);
            Ok(())
        });
        self.add(&channels.test_tags, |c, e: &AddTags| report(c.add_tags(e)));
        self.add(&channels.hook_error, |c, e: &HookError| report(c.hook_error(e)));
    }

    /// Unsubscribe from every channel
    pub fn disable(&mut self) {
        for (channel, id) in self.subscriptions.drain(..) {
            channel.unsubscribe(id);
        }
    }
}

impl Drop for TestPlugin {
    fn drop(&mut self) {
        self.disable();
    }
}
