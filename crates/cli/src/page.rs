//! Synthetic page layout and the scripted viewport scroll.

use std::time::Duration;

use hydra_binding::BoundaryBinding;
use hydra_scheduler::{
    BoxError, ElementHandle, HydrationContext, HydrationTask, Interaction, IntersectionEntry,
    ManualVisibility, ObserveOptions, Priority, Scheduler, SchedulerError, TriggerKind,
};
use tracing::{debug, info};

const SECTION_HEIGHT: f64 = 320.0;
const SECTION_GAP: f64 = 40.0;

/// One boundary on the synthetic page.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: String,
    pub top: f64,
    pub height: f64,
    pub element: ElementHandle,
    pub trigger: TriggerKind,
    pub priority: Priority,
    pub above_fold: bool,
    pub work: Duration,
    pub fails: bool,
}

impl Section {
    /// Fraction of the section inside `[top, bottom)`.
    pub fn intersection_ratio(&self, top: f64, bottom: f64) -> f64 {
        let visible = (self.top + self.height).min(bottom) - self.top.max(top);
        if visible <= 0.0 {
            0.0
        } else {
            (visible / self.height).min(1.0)
        }
    }

    fn task(&self) -> HydrationTask {
        let work = self.work;
        let fails = self.fails;
        HydrationTask::new(self.id.as_str(), move |ctx: HydrationContext| async move {
            tokio::time::sleep(work).await;
            if fails {
                return Err::<(), BoxError>(
                    format!("{}: upstream unavailable", ctx.boundary_id()).into(),
                );
            }
            Ok(())
        })
        .priority(self.priority)
        .trigger(self.trigger)
        .above_fold(self.above_fold)
        .metadata("top", self.top)
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub sections: Vec<Section>,
    pub viewport_height: f64,
}

impl Page {
    /// A deterministic page of `count` stacked sections. The first one is the
    /// navigation bar, hydrated immediately; everything else in the first
    /// viewport is idle-triggered and above the fold, the rest wait for
    /// visibility.
    pub fn synthetic(count: usize, viewport_height: f64) -> Self {
        let sections = (0..count)
            .map(|i| {
                let top = i as f64 * (SECTION_HEIGHT + SECTION_GAP);
                let above_fold = top < viewport_height;
                let (id, trigger, priority) = if i == 0 {
                    ("nav".to_string(), TriggerKind::Immediate, Priority::Critical)
                } else if above_fold {
                    (format!("hero-{i}"), TriggerKind::Idle, Priority::High)
                } else {
                    let priority = match i % 4 {
                        0 => Priority::High,
                        1 | 2 => Priority::Normal,
                        _ => Priority::Low,
                    };
                    (format!("section-{i}"), TriggerKind::Visible, priority)
                };
                Section {
                    element: ElementHandle::new(format!("el-{id}")),
                    id,
                    top,
                    height: SECTION_HEIGHT,
                    trigger,
                    priority,
                    above_fold,
                    work: Duration::from_millis(2 + (i as u64 * 7) % 11),
                    fails: i > 0 && i % 13 == 0,
                }
            })
            .collect();
        Self {
            sections,
            viewport_height,
        }
    }

    pub fn height(&self) -> f64 {
        self.sections
            .last()
            .map(|s| s.top + s.height)
            .unwrap_or_default()
    }

    /// Register every section and mount its element. Bindings come back in
    /// section order and unregister when dropped.
    pub fn mount(&self, scheduler: &Scheduler) -> Result<Vec<BoundaryBinding>, SchedulerError> {
        let mut bindings = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let binding = BoundaryBinding::bind(scheduler, section.task())?;
            binding.mount(section.element.clone())?;
            bindings.push(binding);
        }
        info!(count = bindings.len(), "Synthetic page mounted");
        Ok(bindings)
    }
}

/// Scroll from the top of the page to the bottom, reporting intersection
/// changes for visible-triggered sections to `visibility`. Every fifth
/// section entering the viewport receives a click.
pub async fn scroll(
    page: &Page,
    bindings: &[BoundaryBinding],
    visibility: &ManualVisibility,
    options: &ObserveOptions,
    step: f64,
    interval: Duration,
) {
    let mut states = vec![(false, false); page.sections.len()];
    let end = (page.height() - page.viewport_height).max(0.0);
    let step = step.max(1.0);
    let mut top = 0.0_f64;

    loop {
        let root_top = top - options.root_margin.top.resolve(page.viewport_height);
        let root_bottom =
            top + page.viewport_height + options.root_margin.bottom.resolve(page.viewport_height);

        for (i, section) in page.sections.iter().enumerate() {
            if section.trigger != TriggerKind::Visible {
                continue;
            }
            let ratio = section.intersection_ratio(root_top, root_bottom);
            let entry = if ratio > 0.0 {
                IntersectionEntry::entering(ratio)
            } else {
                IntersectionEntry::leaving()
            };
            let state = (entry.is_intersecting, entry.qualifies(options.threshold));
            if state == states[i] {
                continue;
            }
            let first_entry = state.0 && !states[i].0;
            states[i] = state;
            visibility.fire(&section.element, entry);

            if first_entry && i % 5 == 0 {
                if let Some(binding) = bindings.get(i) {
                    let click = Interaction::new("click").with_target(section.element.as_str());
                    if let Ok(kept) = binding.record_interaction(click) {
                        debug!(boundary_id = %section.id, kept, "Simulated click");
                    }
                }
            }
        }

        if top >= end {
            break;
        }
        top = (top + step).min(end);
        tokio::time::sleep(interval).await;
    }
    info!(scrolled_to = top, "Scroll finished");
}
